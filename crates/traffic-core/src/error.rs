//! Error types shared by the core components.

use thiserror::Error;

/// Failure reported by a Road Store, Ping Store or Alert Sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid ping: {0}")]
    InvalidPing(String),
    #[error("invalid anomaly rule: {0}")]
    InvalidRule(String),
    #[error("anomaly rule {0} already exists")]
    DuplicateRule(String),
}
