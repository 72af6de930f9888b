//! Nested-loop join and unnest
//!
//! For each outer row the entire inner subtree is re-executed and the join
//! predicate evaluated per combined row. `inner` drops non-matches;
//! `leftOuter` additionally synthesizes exactly one row with the inner
//! positions set to missing when an outer row matches nothing.
//!
//! Unnest iterates an array-valued expression instead of an inner child,
//! emitting one combined row per element.
//!
//! Complexity is O(outer x inner); correctness, not performance, is the
//! contract here.

use crate::expr::{is_true, BoxExpr, Expr};
use crate::value::MISSING;

use super::context::{ExecCtx, Vars};
use super::errors::{ExecError, ExecResult};
use super::op::Op;
use super::sink::{RowSink, ScanStats};

pub(super) fn execute(
    ctx: &ExecCtx,
    op: &Op,
    vars: &Vars,
    sink: &mut dyn RowSink,
) -> ExecResult<()> {
    let outer = op.child(0)?;
    let inner = op.child(1)?;
    let predicate = ctx.exprs.compile(&op.params, &op.labels)?;
    let left_outer = op.kind.ends_with("leftOuter");

    let mut driver = OuterSink {
        ctx,
        vars,
        inner,
        predicate,
        inner_width: inner.labels.len(),
        left_outer,
        parent: sink,
    };
    super::execute(ctx, outer, vars, &mut driver)
}

struct OuterSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    inner: &'a Op,
    predicate: BoxExpr,
    inner_width: usize,
    left_outer: bool,
    parent: &'a mut dyn RowSink,
}

impl RowSink for OuterSink<'_> {
    fn on_row(&mut self, outer_row: &[&[u8]]) -> ExecResult<()> {
        let mut matched = false;
        {
            let mut probe = InnerSink {
                ctx: self.ctx,
                vars: self.vars,
                predicate: self.predicate.as_ref(),
                outer_row,
                matched: &mut matched,
                parent: &mut *self.parent,
            };
            super::execute(self.ctx, self.inner, self.vars, &mut probe)?;
        }

        if self.left_outer && !matched {
            let mut combined: Vec<&[u8]> = outer_row.to_vec();
            combined.resize(outer_row.len() + self.inner_width, MISSING);
            self.parent.on_row(&combined)?;
        }
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}

struct InnerSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    predicate: &'a dyn Expr,
    outer_row: &'a [&'a [u8]],
    matched: &'a mut bool,
    parent: &'a mut dyn RowSink,
}

impl RowSink for InnerSink<'_> {
    fn on_row(&mut self, inner_row: &[&[u8]]) -> ExecResult<()> {
        let mut combined: Vec<&[u8]> = Vec::with_capacity(self.outer_row.len() + inner_row.len());
        combined.extend_from_slice(self.outer_row);
        combined.extend_from_slice(inner_row);

        let verdict = self.predicate.eval(self.ctx, self.vars, &combined)?;
        if is_true(&verdict) {
            *self.matched = true;
            self.parent.on_row(&combined)?;
        }
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}

pub(super) fn execute_unnest(
    ctx: &ExecCtx,
    op: &Op,
    vars: &Vars,
    sink: &mut dyn RowSink,
) -> ExecResult<()> {
    let child = op.child(0)?;
    let array_expr = ctx.exprs.compile(&op.params, &child.labels)?;
    let left_outer = op.kind.ends_with("leftOuter");

    let mut driver = UnnestSink {
        ctx,
        vars,
        array_expr,
        left_outer,
        parent: sink,
    };
    super::execute(ctx, child, vars, &mut driver)
}

struct UnnestSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    array_expr: BoxExpr,
    left_outer: bool,
    parent: &'a mut dyn RowSink,
}

impl RowSink for UnnestSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        let value = self.array_expr.eval(self.ctx, self.vars, row)?;

        let mut emitted = false;
        if !value.is_empty() {
            let parsed: serde_json::Value = serde_json::from_slice(&value)
                .map_err(|e| ExecError::expr(format!("unnest: not JSON: {e}")))?;
            if let serde_json::Value::Array(items) = parsed {
                for item in items {
                    let bytes = serde_json::to_vec(&item)
                        .map_err(|e| ExecError::expr(e.to_string()))?;
                    let mut combined: Vec<&[u8]> = row.to_vec();
                    combined.push(&bytes);
                    self.parent.on_row(&combined)?;
                    emitted = true;
                }
            }
        }

        if self.left_outer && !emitted {
            let mut combined: Vec<&[u8]> = row.to_vec();
            combined.push(MISSING);
            self.parent.on_row(&combined)?;
        }
        Ok(())
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

    fn dept_emp_join(kind: &str, outer_csv: &str) -> Op {
        Op::node(
            kind,
            &["dept", "city", "emp", "empDept"],
            json!(["eq", ["field", "dept"], ["field", "empDept"]]),
            vec![
                Op::leaf("scan", &["dept", "city"], json!(["csv", outer_csv])),
                Op::leaf(
                    "scan",
                    &["emp", "empDept"],
                    json!(["csv", "\"dan\",\"dev\"\n\"doug\",\"dev\"\n\"frank\",\"finance\"\n\"fred\",\"finance\""]),
                ),
            ],
        )
    }

    #[test]
    fn test_inner_join_outer_row_major_order() {
        let ctx = ExecCtx::default();
        let op = dept_emp_join("joinNestedLoop-inner", "\"dev\",\"paris\"\n\"finance\",\"london\"");
        let mut out = RowCollector::new();
        execute(&ctx, &op, &Vars::new(), &mut out).unwrap();
        assert_eq!(
            out.as_strings(),
            vec![
                vec!["\"dev\"", "\"paris\"", "\"dan\"", "\"dev\""],
                vec!["\"dev\"", "\"paris\"", "\"doug\"", "\"dev\""],
                vec!["\"finance\"", "\"london\"", "\"frank\"", "\"finance\""],
                vec!["\"finance\"", "\"london\"", "\"fred\"", "\"finance\""],
            ]
        );
    }

    #[test]
    fn test_left_outer_synthesizes_single_missing_row() {
        let ctx = ExecCtx::default();
        let op = dept_emp_join(
            "joinNestedLoop-leftOuter",
            "\"dev\",\"paris\"\n\"sales\",\"san diego\"",
        );
        let mut out = RowCollector::new();
        execute(&ctx, &op, &Vars::new(), &mut out).unwrap();
        let rows = out.as_strings();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], vec!["\"sales\"", "\"san diego\"", "", ""]);
        // Matched outer rows get no synthesized extras.
        assert_eq!(rows[0][2], "\"dan\"");
        assert_eq!(rows[1][2], "\"doug\"");
    }

    #[test]
    fn test_unnest_inner_one_row_per_element() {
        // Single-element arrays carry no commas, so they survive the
        // comma-split scan framing.
        let ctx = ExecCtx::default();
        let op = Op::node(
            "unnest-inner",
            &["n", "elem"],
            json!(["field", "n"]),
            vec![Op::leaf("scan", &["n"], json!(["csv", "[7]\n[8]"]))],
        );
        let mut out = RowCollector::new();
        execute(&ctx, &op, &Vars::new(), &mut out).unwrap();
        assert_eq!(out.as_strings(), vec![vec!["[7]", "7"], vec!["[8]", "8"]]);
    }

    #[test]
    fn test_unnest_left_outer_empty_array() {
        let ctx = ExecCtx::default();
        let op = Op::node(
            "unnest-leftOuter",
            &["n", "elem"],
            json!(["field", "n"]),
            vec![Op::leaf("scan", &["n"], json!(["csv", "[7]\n[]"]))],
        );
        let mut out = RowCollector::new();
        execute(&ctx, &op, &Vars::new(), &mut out).unwrap();
        assert_eq!(out.as_strings(), vec![vec!["[7]", "7"], vec!["[]", ""]]);
    }
}
