//! Process-level errors raised while bootstrapping and running the server.
//!
//! Request-scoped failures never reach this type; the HTTP layer turns them
//! into responses.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::history::HistoryError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("history store error: {0}")]
    History(#[from] HistoryError),
    #[error("broker client error: {0}")]
    Broker(#[from] BrokerError),
}
