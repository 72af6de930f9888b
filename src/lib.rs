//! aeroflow - a strict, deterministic, spill-aware streaming execution
//! engine for document query plans
//!
//! Plans are trees of operator nodes; execution pulls rows of JSON-encoded
//! values through parent-to-child sink chains, spilling join, grouping and
//! windowing state to external stores so memory stays bounded independent
//! of input size.

pub mod aggregate;
pub mod exec;
pub mod expr;
pub mod store;
pub mod value;
pub mod window;

pub use exec::{
    execute, EngineConfig, ExecCtx, ExecError, ExecResult, Op, RowCollector, RowSink, Vars,
};
