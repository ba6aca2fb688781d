use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

// UI Routes - web interface
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(handlers::ui::index_handler).post(handlers::ui::ask_form_handler),
        )
        .route("/static/{*path}", get(static_handler))
}

// API Routes - JSON access to the same pipeline
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            .route("/ask", post(handlers::api::ask))
            // Prompt inspection
            .route("/prompt", get(handlers::api::get_prompt))
            .route("/examples", get(handlers::api::list_examples))
            // Recall store
            .route("/history", post(handlers::api::remember))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
