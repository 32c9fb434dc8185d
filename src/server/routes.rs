use axum::routing::{get, post};
use axum::Router;

use super::handlers;
use super::AppState;

/// Builds the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/crawl/start/:url_id", post(handlers::start_crawl))
        .route("/api/v1/crawl/stop/:url_id", post(handlers::stop_crawl))
        .route("/api/v1/crawl/latest/:url_id", get(handlers::latest_crawl))
        .route("/api/v1/crawl/stream", get(handlers::stream_updates))
        .route(
            "/api/v1/internal/notify-crawl-update",
            post(handlers::relay_notification),
        )
        .with_state(state)
}
