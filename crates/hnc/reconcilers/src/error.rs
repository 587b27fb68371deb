//! Error types for reconciliation

use hnc_client::ClientError;
use hnc_forest::ForestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Forest error: {0}")]
    Forest(#[from] ForestError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),
}

impl ReconcileError {
    /// Conflicts and timeouts resolve themselves after a retry
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Client(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
