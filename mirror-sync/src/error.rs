//! Error types for mirror writes

use thiserror::Error;

/// Result type for mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Mirror errors.
///
/// These never propagate into ledger operations; they are logged and folded
/// into a success flag by the dispatcher.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure reaching the document store
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Document store rejected the write
    #[error("Document store rejected write: HTTP {status}")]
    Rejected {
        /// HTTP status code returned
        status: u16,
    },

    /// Store configured unavailable (used by test doubles)
    #[error("Mirror store unavailable: {0}")]
    Unavailable(String),
}
