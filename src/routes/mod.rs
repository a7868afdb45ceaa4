// Route modules
pub mod purchases;

use crate::{
    app_state::AppState,
    middleware::{jwt_auth_middleware, logging_middleware},
};
use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Upper bound on one request, including the billing-platform round trips
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1_routes(state.clone()))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes(state: AppState) -> Router<AppState> {
    // Callable endpoints require a signed-in user
    let authenticated_routes = Router::new()
        .route("/purchases/validate", post(purchases::validate_purchase))
        .route("/entitlement", get(purchases::get_entitlement))
        .layer(middleware::from_fn_with_state(state, jwt_auth_middleware));

    Router::new()
        .merge(authenticated_routes)
        .layer(middleware::from_fn(logging_middleware))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
