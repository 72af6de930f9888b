//! Window partition operator
//!
//! Projects the partitioning expressions into a canonical composite key per
//! row. While the key matches the previous row's, the row is appended
//! (paired with its projected partition and order values) to the partition
//! buffer; on a key change the buffered partition is flushed downstream,
//! the buffer reset, and the partition id incremented. Whatever remains is
//! flushed at end of input.
//!
//! Precondition: the child is already sorted by at least the partitioning
//! key. This operator detects boundaries; it does not sort.

use std::cell::RefCell;
use std::rc::Rc;

use crate::exec::context::{ExecCtx, TempSlot, Vars};
use crate::exec::errors::{ExecError, ExecResult};
use crate::exec::op::Op;
use crate::exec::sink::{RowSink, ScanStats};
use crate::expr::BoxExpr;
use crate::value::{decode_pair_row, encode_composite_key, encode_row_pair};

use super::WindowState;

pub fn execute(ctx: &ExecCtx, op: &Op, vars: &Vars, sink: &mut dyn RowSink) -> ExecResult<()> {
    let child = op.child(0)?;

    let by_specs = op
        .param("by")?
        .as_array()
        .ok_or_else(|| ExecError::plan("window-partition: by must be an array"))?;
    let by_exprs = ctx.exprs.compile_all(by_specs, &child.labels)?;

    let order_exprs = match op.param_opt("order") {
        Some(order) => {
            let specs = order
                .as_array()
                .ok_or_else(|| ExecError::plan("window-partition: order must be an array"))?;
            ctx.exprs.compile_all(specs, &child.labels)?
        }
        None => Vec::new(),
    };

    let slot = op
        .param("slot")?
        .as_u64()
        .ok_or_else(|| ExecError::plan("window-partition: slot must be unsigned"))?
        as usize;

    let heap = ctx.stores.alloc_heap()?;
    let state = Rc::new(RefCell::new(WindowState {
        heap: Some(heap),
        frames: Vec::new(),
    }));
    vars.set_temp(slot, TempSlot::Windows(Rc::clone(&state)));

    let result = run(ctx, vars, sink, child, &by_exprs, &order_exprs, &state);

    vars.clear_temp(slot);
    if let Some(heap) = state.borrow_mut().heap.take() {
        ctx.stores.recycle_heap(heap);
    }
    result
}

fn run(
    ctx: &ExecCtx,
    vars: &Vars,
    sink: &mut dyn RowSink,
    child: &Op,
    by_exprs: &[BoxExpr],
    order_exprs: &[BoxExpr],
    state: &Rc<RefCell<WindowState>>,
) -> ExecResult<()> {
    let mut partitioner = PartitionSink {
        ctx,
        vars,
        by_exprs,
        order_exprs,
        state: Rc::clone(state),
        last_key: None,
        parent: sink,
    };
    crate::exec::execute(ctx, child, vars, &mut partitioner)?;
    // End of input: flush the final partition.
    partitioner.flush()
}

struct PartitionSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    by_exprs: &'a [BoxExpr],
    order_exprs: &'a [BoxExpr],
    state: Rc<RefCell<WindowState>>,
    last_key: Option<Vec<u8>>,
    parent: &'a mut dyn RowSink,
}

impl PartitionSink<'_> {
    /// Yields every row buffered for the current partition. The buffer is
    /// left intact so downstream frame cursors can address the whole
    /// partition while its rows flow through.
    fn flush(&mut self) -> ExecResult<()> {
        let len = self.state.borrow_mut().heap_mut()?.len();
        let mut record = Vec::new();
        for i in 0..len {
            self.state.borrow_mut().heap_mut()?.get(i, &mut record)?;
            let mut row = Vec::new();
            decode_pair_row(&record, &mut row)?;
            self.parent.on_row(&row)?;
        }
        Ok(())
    }

    fn start_next_partition(&mut self) -> ExecResult<()> {
        let mut state = self.state.borrow_mut();
        let heap = state.heap_mut()?;
        heap.reset()?;
        let id = heap.tag() + 1;
        heap.set_tag(id);
        tracing::trace!(partition = id, "window partition boundary");
        Ok(())
    }
}

impl RowSink for PartitionSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        // Project the partition key and the ranking values.
        let mut projected: Vec<Vec<u8>> = Vec::with_capacity(self.by_exprs.len() + self.order_exprs.len());
        for expr in self.by_exprs.iter().chain(self.order_exprs.iter()) {
            projected.push(expr.eval(self.ctx, self.vars, row)?.into_owned());
        }
        let key_refs: Vec<&[u8]> = projected[..self.by_exprs.len()]
            .iter()
            .map(|v| v.as_slice())
            .collect();
        let mut key = Vec::new();
        encode_composite_key(&key_refs, &mut key)?;

        if let Some(last) = &self.last_key {
            if *last != key {
                self.flush()?;
                self.start_next_partition()?;
            }
        }

        let projected_refs: Vec<&[u8]> = projected.iter().map(|v| v.as_slice()).collect();
        let mut record = Vec::new();
        encode_row_pair(row, &projected_refs, &mut record);
        self.state.borrow_mut().heap_mut()?.push(&record)?;

        self.last_key = Some(key);
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}
