//! Value model error types

use thiserror::Error;

/// Result type for value model operations
pub type ValueResult<T> = Result<T, ValueError>;

/// Value encoding/decoding errors
#[derive(Debug, Error)]
pub enum ValueError {
    /// A row encoding ended before the declared length was reached
    #[error("truncated row encoding at byte {0}")]
    Truncated(usize),

    /// A value that must be JSON failed to parse
    #[error("invalid JSON value: {0}")]
    Json(#[from] serde_json::Error),
}
