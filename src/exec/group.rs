//! Streaming group-by aggregation
//!
//! Single pass over the child: the GROUP BY expressions project into a
//! newline-joined composite of canonical encodings, which keys an external
//! map of concatenated aggregate accumulators. Accumulators are updated in
//! place while the new state fits the stored buffer and replaced through a
//! full `set` when an aggregate's state grows.
//!
//! Once the child drains without error, every map entry is visited once in
//! the map's native order; callers needing deterministic output order
//! compose with order-by.

use std::sync::Arc;

use crate::aggregate::Aggregate;
use crate::expr::BoxExpr;
use crate::store::KvMap;
use crate::value::{encode_composite_key, split_composite_key};

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

    let by_specs = op
        .param("by")?
        .as_array()
        .ok_or_else(|| ExecError::plan("group: by must be an array"))?;
    let by_exprs = ctx.exprs.compile_all(by_specs, &child.labels)?;

    let agg_specs = op
        .param("aggs")?
        .as_array()
        .ok_or_else(|| ExecError::plan("group: aggs must be an array"))?;
    let mut aggs: Vec<(Arc<dyn Aggregate>, BoxExpr)> = Vec::with_capacity(agg_specs.len());
    for spec in agg_specs {
        let pair = spec
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| ExecError::plan("group: each agg must be [name, expr]"))?;
        let name = pair[0]
            .as_str()
            .ok_or_else(|| ExecError::plan("group: agg name must be a string"))?;
        aggs.push((ctx.aggs.get(name)?, ctx.exprs.compile(&pair[1], &child.labels)?));
    }

    let mut map = ctx.stores.alloc_map()?;
    let result = run(ctx, vars, sink, child, &by_exprs, &aggs, map.as_mut());
    ctx.stores.recycle_map(map);
    result
}

fn run(
    ctx: &ExecCtx,
    vars: &Vars,
    sink: &mut dyn RowSink,
    child: &Op,
    by_exprs: &[BoxExpr],
    aggs: &[(Arc<dyn Aggregate>, BoxExpr)],
    map: &mut dyn KvMap,
) -> ExecResult<()> {
    {
        let mut grouper = GroupSink {
            ctx,
            vars,
            by_exprs,
            aggs,
            map: &mut *map,
            key_buf: Vec::new(),
            parent: &mut *sink,
        };
        super::execute(ctx, child, vars, &mut grouper)?;
    }
    tracing::debug!(groups = map.len(), "group build complete");

    // Flush: decode each key back into output columns and materialize the
    // aggregate results behind them.
    let by_len = by_exprs.len();
    let mut deferred: Option<ExecError> = None;
    map.visit(&mut |key, acc| {
        let outcome = (|| -> ExecResult<()> {
            let group_vals = split_composite_key(key);
            let mut results: Vec<Vec<u8>> = Vec::with_capacity(aggs.len());
            let mut rest = acc;
            for (agg, _) in aggs {
                let mut value = Vec::new();
                let used = agg.result(ctx, rest, &mut value)?;
                rest = &rest[used..];
                results.push(value);
            }

            let mut row: Vec<&[u8]> = Vec::with_capacity(by_len + results.len());
            row.extend(group_vals.into_iter().take(by_len));
            row.extend(results.iter().map(|v| v.as_slice()));
            sink.on_row(&row)
        })();
        match outcome {
            Ok(()) => Ok(true),
            Err(e) => {
                deferred = Some(e);
                Ok(false)
            }
        }
    })?;
    if let Some(e) = deferred {
        return Err(e);
    }
    Ok(())
}

struct GroupSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    by_exprs: &'a [BoxExpr],
    aggs: &'a [(Arc<dyn Aggregate>, BoxExpr)],
    map: &'a mut dyn KvMap,
    key_buf: Vec<u8>,
    parent: &'a mut dyn RowSink,
}

impl RowSink for GroupSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        // Project the group key.
        let mut key = std::mem::take(&mut self.key_buf);
        key.clear();
        {
            let mut vals: Vec<Vec<u8>> = Vec::with_capacity(self.by_exprs.len());
            for expr in self.by_exprs {
                vals.push(expr.eval(self.ctx, self.vars, row)?.into_owned());
            }
            let refs: Vec<&[u8]> = vals.iter().map(|v| v.as_slice()).collect();
            encode_composite_key(&refs, &mut key)?;
        }

        // Project the aggregate inputs before touching the map, since both
        // borrow from the row.
        let mut inputs: Vec<Vec<u8>> = Vec::with_capacity(self.aggs.len());
        for (_, input_expr) in self.aggs {
            inputs.push(input_expr.eval(self.ctx, self.vars, row)?.into_owned());
        }

        let known = self.map.get(&key)?.is_some();
        if known {
            let grown = {
                let slot = self
                    .map
                    .get(&key)?
                    .ok_or_else(|| ExecError::plan("group: entry vanished"))?;
                let mut new_acc = Vec::with_capacity(slot.len());
                let mut rest: &[u8] = slot;
                for ((agg, _), input) in self.aggs.iter().zip(&inputs) {
                    let used = agg.update(self.ctx, input, rest, &mut new_acc)?;
                    rest = &rest[used..];
                }
                if new_acc.len() <= slot.len() {
                    slot[..new_acc.len()].copy_from_slice(&new_acc);
                    None
                } else {
                    Some(new_acc)
                }
            };
            if let Some(acc) = grown {
                self.map.set(&key, &acc)?;
            }
        } else {
            // First sight of the key: initialize every segment, then fold
            // this row in.
            let mut init = Vec::new();
            for (agg, _) in self.aggs {
                agg.init(&mut init);
            }
            let mut acc = Vec::with_capacity(init.len());
            let mut rest: &[u8] = &init;
            for ((agg, _), input) in self.aggs.iter().zip(&inputs) {
                let used = agg.update(self.ctx, input, rest, &mut acc)?;
                rest = &rest[used..];
            }
            self.map.set(&key, &acc)?;
        }

        self.key_buf = key;
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}
