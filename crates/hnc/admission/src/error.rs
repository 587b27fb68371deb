//! Admission errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("No admission hook serves path {0}")]
    UnknownPath(String),

    #[error("Admission review carries no request")]
    MissingRequest,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;
