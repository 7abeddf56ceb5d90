use thiserror::Error;

use crate::types::JobStatus;

/// Signing-workflow errors surfaced to callers.
///
/// `InvalidToken` deliberately does not distinguish missing, expired, and
/// already-consumed correlation tokens; the single message prevents callers
/// from probing which case occurred.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid or expired state parameter")]
    InvalidToken,

    #[error("'{dependency}' is temporarily unavailable, try again later")]
    DependencyUnavailable { dependency: &'static str },

    #[error("Transaction id already used, regenerate and retry")]
    TransactionConflict,

    #[error("Identity verification failed")]
    SecurityMismatch,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Job is terminal in status '{from}', no further transitions allowed")]
    Terminal { from: JobStatus },

    #[error("Illegal status transition from '{from}' to '{to}'")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SignError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unavailable(dependency: &'static str) -> Self {
        Self::DependencyUnavailable { dependency }
    }
}

impl From<serde_json::Error> for SignError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
