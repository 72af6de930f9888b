//! Predicate filter
//!
//! Forwards rows whose predicate evaluates to literal `true`; missing and
//! null fold to false.

use crate::expr::{is_true, BoxExpr};

use super::context::{ExecCtx, Vars};
use super::errors::ExecResult;
use super::op::Op;
use super::sink::{RowSink, ScanStats};

pub(super) fn execute(
    ctx: &ExecCtx,
    op: &Op,
    vars: &Vars,
    sink: &mut dyn RowSink,
) -> ExecResult<()> {
    let child = op.child(0)?;
    let predicate = ctx.exprs.compile(&op.params, &child.labels)?;

    let mut filtered = FilterSink {
        ctx,
        vars,
        predicate,
        parent: sink,
    };
    super::execute(ctx, child, vars, &mut filtered)
}

struct FilterSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    predicate: BoxExpr,
    parent: &'a mut dyn RowSink,
}

impl RowSink for FilterSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        let verdict = self.predicate.eval(self.ctx, self.vars, row)?;
        if is_true(&verdict) {
            self.parent.on_row(row)?;
        }
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}
