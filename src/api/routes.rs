//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/api/smart-contract/deploy",
            post(handlers::deploy_contract),
        )
        .route(
            "/api/smart-contract/interact",
            post(handlers::interact_contract),
        )
        .with_state(state)
        .layer(cors)
}
