use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers;
use crate::history::SentHistory;
use crate::ingest::IngestPipeline;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    /// `None` when the sent history is disabled.
    pub history: Option<SentHistory>,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestPipeline>, history: Option<SentHistory>) -> Self {
        Self { pipeline, history }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/topics",
            get(handlers::list_topics).post(handlers::create_topic),
        )
        .route("/topics/{topic}", post(handlers::publish_message))
        .route("/topics/{topic}/subscriptions", post(handlers::subscribe))
        .route(
            "/topics/{topic}/subscriptions/{id}",
            get(handlers::get_subscription),
        )
        .route("/subscriptions", get(handlers::list_subscriptions))
        .route("/history/sent", get(handlers::sent_history))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the router on `listener` until `shutdown` resolves, then lets
/// in-flight requests finish.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
