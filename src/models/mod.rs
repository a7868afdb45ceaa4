// Request/Response models
pub mod common;
pub mod entitlement;
pub mod validation;
