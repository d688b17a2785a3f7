pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::credits::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Credits API
        .route("/api/v1/credits/balance", get(handlers::handle_get_balance))
        .route("/api/v1/credits/consume", post(handlers::handle_consume))
        .route(
            "/api/v1/credits/packages",
            get(handlers::handle_list_packages),
        )
        .route(
            "/api/v1/credits/history",
            get(handlers::handle_get_history),
        )
        .route(
            "/api/v1/credits/purchase",
            post(handlers::handle_purchase),
        )
        // Admin API
        .route(
            "/api/v1/admin/credits/config",
            get(handlers::handle_get_config).patch(handlers::handle_update_config),
        )
        .with_state(state)
}
