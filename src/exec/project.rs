//! Expression projection
//!
//! Evaluates N expressions per row, writing results positionally into a
//! reused output buffer. The buffer is overwritten on each call, so
//! consumers retaining rows across a pipeline boundary must copy.

use crate::expr::BoxExpr;

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
    let exprs = ctx.exprs.compile_all(op.params_array()?, &child.labels)?;

    let mut projected = ProjectSink {
        ctx,
        vars,
        out: vec![Vec::new(); exprs.len()],
        exprs,
        parent: sink,
    };
    super::execute(ctx, child, vars, &mut projected)
}

struct ProjectSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    exprs: Vec<BoxExpr>,
    out: Vec<Vec<u8>>,
    parent: &'a mut dyn RowSink,
}

impl RowSink for ProjectSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        for (i, expr) in self.exprs.iter().enumerate() {
            let value = expr.eval(self.ctx, self.vars, row)?;
            self.out[i].clear();
            self.out[i].extend_from_slice(&value);
        }
        let projected: Vec<&[u8]> = self.out.iter().map(|v| v.as_slice()).collect();
        self.parent.on_row(&projected)
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{execute, RowCollector};
    use serde_json::json;

    #[test]
    fn test_project_reorders_and_synthesizes() {
        let ctx = ExecCtx::default();
        let op = Op::node(
            "project",
            &["c", "a", "k"],
            json!([["field", "c"], ["field", "a"], ["json", "x"]]),
            vec![Op::leaf("scan", &["a", "b", "c"], json!(["csv", "1,2,3"]))],
        );
        let mut out = RowCollector::new();
        execute(&ctx, &op, &Vars::new(), &mut out).unwrap();
        assert_eq!(out.as_strings(), vec![vec!["3", "1", "\"x\""]]);
    }
}
