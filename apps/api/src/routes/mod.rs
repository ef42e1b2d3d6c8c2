pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/run", post(handlers::handle_create_run))
        .route("/api/run/:run_id", get(handlers::handle_get_run))
        .route("/api/models", get(handlers::handle_list_models))
        .with_state(state)
}
