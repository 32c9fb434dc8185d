//! HTTP server for crawl submission and live updates
//!
//! Provides the API used by the browser front end:
//! - Start and stop crawls of the caller's URLs
//! - Poll the latest crawl of a URL
//! - A server-sent event stream of crawl updates per user
//! - An internal endpoint through which worker processes relay updates

mod handlers;
mod routes;

pub use handlers::{ErrorBody, UserId, USER_ID_HEADER};
pub use routes::create_router;

use crate::crawler::CrawlService;
use crate::notify::Broadcaster;
use crate::storage::SharedStorage;
use crate::{ConfigError, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub service: CrawlService,
    pub broadcaster: Arc<Broadcaster>,
    pub storage: SharedStorage,
}

impl AppState {
    pub fn new(service: CrawlService, broadcaster: Arc<Broadcaster>) -> Self {
        let storage = Arc::clone(service.storage());
        Self {
            service,
            broadcaster,
            storage,
        }
    }
}

/// Start the web server and run until `shutdown` resolves.
///
/// Peer addresses are recorded so the internal relay endpoint can refuse
/// callers from other hosts.
pub async fn serve<F>(bind: &str, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| ConfigError::InvalidBind(format!("'{}': {}", bind, e)))?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
