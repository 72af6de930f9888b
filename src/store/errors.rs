//! Storage port error types

use thiserror::Error;

/// Result type for storage port operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage port errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store could not be allocated
    #[error("store allocation failed: {0}")]
    Alloc(String),

    /// A read addressed bytes outside the store
    #[error("read out of bounds: offset {offset}, size {size}, store length {len}")]
    OutOfBounds {
        /// Requested offset
        offset: u64,
        /// Requested size
        size: u64,
        /// Current store length
        len: u64,
    },

    /// A spill record failed checksum validation on read
    #[error("checksum mismatch at offset {0}")]
    Corruption(u64),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
