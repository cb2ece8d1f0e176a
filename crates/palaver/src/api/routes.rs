use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Uploads travel inline as data URLs, so the limit is generous.
const BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Creates the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/chat", post(handlers::chat))
        .route("/api/chat/history", get(handlers::history))
        .route("/api/chat/clear", post(handlers::clear))
        .route("/api/chat/edit", post(handlers::edit))
        .route("/api/chat/save-response", post(handlers::save_response))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
