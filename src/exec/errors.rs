//! Execution error types
//!
//! The first error observed on a call path is latched by propagation: every
//! operator stops producing rows once it sees one, and finalization (store
//! recycling, flush suppression) happens on the way out of each activation.

use thiserror::Error;

use crate::store::StoreError;
use crate::value::ValueError;

/// Result type for execution
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
#[derive(Debug, Error)]
pub enum ExecError {
    /// The plan names an operator kind the dispatcher does not know
    #[error("unknown operator kind: {0}")]
    UnknownKind(String),

    /// The plan's params are malformed for the operator consuming them
    #[error("invalid plan: {0}")]
    Plan(String),

    /// An expression failed to compile or evaluate
    #[error("expression error: {0}")]
    Expr(String),

    /// A plan feature the engine deliberately refuses rather than
    /// approximating
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Cooperative early termination requested through a stats checkpoint
    #[error("execution halted: {0}")]
    Halted(String),

    /// Value encoding/decoding failure
    #[error(transparent)]
    Value(#[from] ValueError),

    /// External store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Shorthand for a malformed-plan error.
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan(msg.into())
    }

    /// Shorthand for an expression error.
    pub fn expr(msg: impl Into<String>) -> Self {
        Self::Expr(msg.into())
    }
}
