//! Error types for platform access

use hnc_types::admission::DenialReason;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure; re-read and retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Refused by admission
    #[error("Denied ({reason}): {message}")]
    Denied {
        reason: DenialReason,
        message: String,
    },

    #[error("Invalid object: {0}")]
    Invalid(String),

    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Conflict(_) | ClientError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ClientError::Denied { .. })
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Invalid(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
