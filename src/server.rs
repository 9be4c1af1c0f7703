//! Process wiring: builds the broker client, the registry, the pipeline and
//! the history store from `Settings`, then serves HTTP until interrupted.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::broker::build_broker;
use crate::config::Settings;
use crate::history::SentHistory;
use crate::ingest::{IngestPipeline, SubscriptionRegistry};
use crate::transport::{AppState, serve};
use crate::utils::error::AppError;

/// Assembles the shared application state described by `settings`.
pub fn build_state(settings: &Settings) -> Result<AppState, AppError> {
    let client = build_broker(&settings.broker)?;
    info!(
        backend = ?settings.broker.backend,
        project = %settings.broker.project_id,
        "broker client ready"
    );

    let registry = Arc::new(SubscriptionRegistry::new());
    let pipeline = Arc::new(IngestPipeline::new(
        client,
        registry,
        &settings.broker.subscription_suffix,
    ));

    let history = if settings.history.enabled {
        info!(path = %settings.history.path, "opening sent history");
        Some(SentHistory::open(&settings.history.path)?)
    } else {
        None
    };

    Ok(AppState::new(pipeline, history))
}

pub async fn run_server(settings: Settings) -> Result<(), AppError> {
    let state = build_state(&settings)?;
    let registry = state.pipeline.registry().clone();

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;

    let result = serve(listener, state, shutdown_signal()).await;
    if let Err(e) = &result {
        error!("HTTP server exited unexpectedly: {}", e);
    }

    registry.shutdown().await;
    info!("all listeners stopped");
    Ok(result?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received. Exiting gracefully.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_state_without_history() {
        let mut settings = Settings::default();
        settings.history.enabled = false;

        let state = build_state(&settings).unwrap();
        assert!(state.history.is_none());
        assert!(state.pipeline.registry().is_empty());
    }

    #[test]
    fn build_state_opens_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.history.path = dir.path().join("sent.db").to_string_lossy().into_owned();

        let state = build_state(&settings).unwrap();
        assert!(state.history.unwrap().is_empty());
    }
}
