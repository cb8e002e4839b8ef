use axum::{routing::get, Router};

use crate::web::auth::auth_middleware;
use crate::web::cors::cors_layer;
use crate::web::handlers;
use crate::web::state::DashboardState;

pub fn build_dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/login", get(handlers::login))
        .route("/api/requests", get(handlers::api_requests))
        .route("/api/request/:request_id", get(handlers::api_request_detail))
        .route("/api/stats", get(handlers::api_stats))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(cors_layer())
        .with_state(state)
}
