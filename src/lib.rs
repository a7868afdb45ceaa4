// Library exports for testing and reuse
pub mod app_state;
pub mod client;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app_state::AppState;
pub use config::{ClientConfig, Config};
pub use error::{ApiError, Result};
