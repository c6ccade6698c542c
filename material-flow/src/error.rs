//! Error types for the material-flow engine

use thiserror::Error;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Flow errors
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying ledger error
    #[error(transparent)]
    Ledger(#[from] ledger_core::Error),

    /// Rejected before any mutation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Material-scoped lock contention; the whole operation may be retried
    #[error("Concurrency conflict: {0}")]
    Conflict(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the operation may be retried wholesale
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict(_) | Error::Ledger(ledger_core::Error::Conflict(_))
        )
    }
}
