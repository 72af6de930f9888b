//! Order-by with offset and limit
//!
//! Buffers every incoming row via deep copy into two reusable arenas (one
//! for value extents, one for concatenated bytes), so retention costs one
//! amortized allocation per arena rather than one per row. After the child
//! drains without error, each buffered row is projected once into a sort
//! key and the row order is sorted with the value comparer, honoring
//! per-column direction and stopping at the first non-equal column; order
//! among fully-equal keys is unspecified.
//!
//! With no order expressions the rows pass through buffered but unsorted,
//! which makes offset/limit-only plans legal.

use std::cmp::Ordering;

use serde_json::Value;

use crate::expr::BoxExpr;

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
    let child = op.child(0)?;

    let mut order_exprs: Vec<BoxExpr> = Vec::new();
    let mut descending: Vec<bool> = Vec::new();
    if let Some(order) = op.param_opt("order") {
        let entries = order
            .as_array()
            .ok_or_else(|| ExecError::plan("orderByOffsetLimit: order must be an array"))?;
        for entry in entries {
            let pair = entry
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| ExecError::plan("orderByOffsetLimit: each order entry is [expr, dir]"))?;
            order_exprs.push(ctx.exprs.compile(&pair[0], &child.labels)?);
            descending.push(match pair[1].as_str() {
                Some("asc") => false,
                Some("desc") => true,
                _ => return Err(ExecError::plan("orderByOffsetLimit: dir must be asc or desc")),
            });
        }
    }

    let offset = match op.param_opt("offset") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .ok_or_else(|| ExecError::plan("orderByOffsetLimit: offset must be unsigned"))?
            as usize,
    };
    let limit = match op.param_opt("limit") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_u64()
                .ok_or_else(|| ExecError::plan("orderByOffsetLimit: limit must be unsigned"))?
                as usize,
        ),
    };

    // Buffer the whole child output.
    let mut buffer = RowArena::default();
    {
        let mut collect = BufferSink {
            buffer: &mut buffer,
            parent: &mut *sink,
        };
        super::execute(ctx, child, vars, &mut collect)?;
    }

    let n = buffer.len();
    let mut order: Vec<usize> = (0..n).collect();

    if !order_exprs.is_empty() {
        // Project each buffered row once into its sort key.
        let mut keys: Vec<Vec<Vec<u8>>> = Vec::with_capacity(n);
        let mut scratch: Vec<&[u8]> = Vec::new();
        for i in 0..n {
            buffer.row(i, &mut scratch);
            let mut key = Vec::with_capacity(order_exprs.len());
            for expr in &order_exprs {
                key.push(expr.eval(ctx, vars, &scratch)?.into_owned());
            }
            keys.push(key);
        }

        order.sort_by(|&a, &b| {
            for (col, desc) in descending.iter().enumerate() {
                let ord = ctx
                    .comparer()
                    .compare_bytes(&keys[a][col], &keys[b][col]);
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    // Yield [offset, offset+limit), clamped to the buffered length.
    let start = offset.min(n);
    let end = match limit {
        Some(l) => start.saturating_add(l).min(n),
        None => n,
    };

    let mut scratch: Vec<&[u8]> = Vec::new();
    for &i in &order[start..end] {
        buffer.row(i, &mut scratch);
        sink.on_row(&scratch)?;
    }
    Ok(())
}

/// Deep-copied row storage: value extents plus one concatenated byte arena.
#[derive(Debug, Default)]
struct RowArena {
    bytes: Vec<u8>,
    vals: Vec<(usize, usize)>,
    rows: Vec<(usize, usize)>,
}

impl RowArena {
    fn push_row(&mut self, row: &[&[u8]]) {
        self.rows.push((self.vals.len(), row.len()));
        for val in row {
            self.vals.push((self.bytes.len(), val.len()));
            self.bytes.extend_from_slice(val);
        }
    }

    fn row<'a>(&'a self, i: usize, out: &mut Vec<&'a [u8]>) {
        out.clear();
        let (first, count) = self.rows[i];
        for (at, len) in &self.vals[first..first + count] {
            out.push(&self.bytes[*at..*at + *len]);
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

struct BufferSink<'a> {
    buffer: &'a mut RowArena,
    parent: &'a mut dyn RowSink,
}

impl RowSink for BufferSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        self.buffer.push_row(row);
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}
