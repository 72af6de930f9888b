//! Operator execution
//!
//! `execute` dispatches on the plan node's kind and drives the whole subtree
//! synchronously: each operator wraps the sink it is handed with its own
//! transform and pulls its children through direct calls. Union staging is
//! the one exception, briefly introducing one thread per branch.
//!
//! Rows flow strictly parent→child→parent through sink calls; termination
//! and errors travel through the returned `Result`. Stores allocated from
//! the context are recycled on every exit path.

pub mod context;
pub mod errors;
pub mod op;
pub mod sink;

mod filter;
mod group;
mod join_hash;
mod join_nl;
mod order;
mod project;
mod scan;
mod union_all;

pub use context::{EngineConfig, ExecCtx, TempSlot, Vars};
pub use errors::{ExecError, ExecResult};
pub use op::Op;
pub use sink::{BudgetCollector, RowCollector, RowSink, ScanStats};

use crate::window;

/// Executes one plan subtree, delivering rows to `sink`.
///
/// Returns `Ok(())` when the subtree is exhausted; the first error on the
/// call path abandons the subtree and is returned after operators along the
/// way have released their stores.
pub fn execute(ctx: &ExecCtx, op: &Op, vars: &Vars, sink: &mut dyn RowSink) -> ExecResult<()> {
    tracing::trace!(kind = %op.kind, "execute operator");
    match op.kind.as_str() {
        "scan" => scan::execute(ctx, op, vars, sink),
        "filter" => filter::execute(ctx, op, vars, sink),
        "project" => project::execute(ctx, op, vars, sink),
        "joinNestedLoop-inner" | "joinNestedLoop-leftOuter" => {
            join_nl::execute(ctx, op, vars, sink)
        }
        "unnest-inner" | "unnest-leftOuter" => join_nl::execute_unnest(ctx, op, vars, sink),
        "joinHash-inner" | "joinHash-leftOuter" | "intersect-all" | "intersect-distinct"
        | "except-all" | "except-distinct" => join_hash::execute(ctx, op, vars, sink),
        "group" => group::execute(ctx, op, vars, sink),
        "orderByOffsetLimit" => order::execute(ctx, op, vars, sink),
        "window-partition" => window::partition::execute(ctx, op, vars, sink),
        "window-frames" => window::frame::execute(ctx, op, vars, sink),
        "unionAll" => union_all::execute(ctx, op, vars, sink),
        other => Err(ExecError::UnknownKind(other.to_string())),
    }
}
