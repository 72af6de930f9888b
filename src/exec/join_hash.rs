//! Hash join and set operations
//!
//! One build/probe engine serves six operator kinds through a per-kind
//! configuration: whether keys are the canonicalized whole row or projected
//! join expressions, which counters are tracked per key, whether full left
//! rows are retained, and whether unprobed entries are emitted at the end.
//!
//! Retained left rows form a chain of byte records in the chunk store:
//!
//! ```text
//! +---------------+---------------+-------------+
//! | prev offset 8 | prev size   8 | framed row  |
//! +---------------+---------------+-------------+
//! ```
//!
//! The map stores the tail address of the chain; traversal walks backward
//! until it reaches the `(0, 0)` terminator, so multi-match keys emit in
//! reverse left-arrival order. Map counters are fixed-width and always
//! updated in place; a changed chain tail is also size-stable, so `set` is
//! only needed on first insert.

use crate::expr::BoxExpr;
use crate::store::{ChunkStore, KvMap};
use crate::value::{decode_row, encode_row, encode_row_canonical, MISSING};

use super::context::{ExecCtx, Vars};
use super::errors::{ExecError, ExecResult};
use super::op::Op;
use super::sink::{RowSink, ScanStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashKind {
    Inner,
    LeftOuter,
    IntersectAll,
    IntersectDistinct,
    ExceptAll,
    ExceptDistinct,
}

/// Per-kind behavior table.
#[derive(Debug, Clone, Copy)]
struct HashCfg {
    /// Key is the canonicalized whole row (set operations) instead of
    /// projected join expressions.
    whole_row_key: bool,
    /// Track how many right rows probed each key.
    probe_count: bool,
    /// Track how many left rows carried each key.
    left_count: bool,
    /// Retain full left rows as a chain.
    chain: bool,
    /// Visit entries never probed and emit them at the end.
    emit_unprobed: bool,
}

fn classify(kind: &str) -> ExecResult<(HashKind, HashCfg)> {
    let cfg = |whole_row_key, probe_count, left_count, chain, emit_unprobed| HashCfg {
        whole_row_key,
        probe_count,
        left_count,
        chain,
        emit_unprobed,
    };
    Ok(match kind {
        "joinHash-inner" => (HashKind::Inner, cfg(false, false, false, true, false)),
        "joinHash-leftOuter" => (HashKind::LeftOuter, cfg(false, true, false, true, true)),
        "intersect-all" => (HashKind::IntersectAll, cfg(true, true, true, false, false)),
        "intersect-distinct" => (HashKind::IntersectDistinct, cfg(true, true, false, false, false)),
        "except-all" => (HashKind::ExceptAll, cfg(true, true, true, false, true)),
        "except-distinct" => (HashKind::ExceptDistinct, cfg(true, true, false, false, true)),
        other => return Err(ExecError::UnknownKind(other.to_string())),
    })
}

/// Decoded map entry; encoded layout is the enabled fields in declaration
/// order, each 8 bytes little-endian.
#[derive(Debug, Clone, Copy, Default)]
struct MapEntry {
    probe: u64,
    left: u64,
    chain_off: u64,
    chain_size: u64,
}

impl MapEntry {
    fn decode(cfg: &HashCfg, bytes: &[u8]) -> ExecResult<Self> {
        let mut entry = Self::default();
        let mut at = 0;
        let mut next = |at: &mut usize| -> ExecResult<u64> {
            let raw: [u8; 8] = bytes
                .get(*at..*at + 8)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| ExecError::plan("hash map entry truncated"))?;
            *at += 8;
            Ok(u64::from_le_bytes(raw))
        };
        if cfg.probe_count {
            entry.probe = next(&mut at)?;
        }
        if cfg.left_count {
            entry.left = next(&mut at)?;
        }
        if cfg.chain {
            entry.chain_off = next(&mut at)?;
            entry.chain_size = next(&mut at)?;
        }
        Ok(entry)
    }

    fn encode(&self, cfg: &HashCfg, out: &mut Vec<u8>) {
        if cfg.probe_count {
            out.extend_from_slice(&self.probe.to_le_bytes());
        }
        if cfg.left_count {
            out.extend_from_slice(&self.left.to_le_bytes());
        }
        if cfg.chain {
            out.extend_from_slice(&self.chain_off.to_le_bytes());
            out.extend_from_slice(&self.chain_size.to_le_bytes());
        }
    }

    /// Writes this entry over the stored one; entries are fixed width per
    /// configuration, so this is always a size-stable update.
    fn store(&self, cfg: &HashCfg, slot: &mut [u8]) {
        let mut encoded = Vec::with_capacity(32);
        self.encode(cfg, &mut encoded);
        slot[..encoded.len()].copy_from_slice(&encoded);
    }
}

pub(super) fn execute(
    ctx: &ExecCtx,
    op: &Op,
    vars: &Vars,
    sink: &mut dyn RowSink,
) -> ExecResult<()> {
    let (kind, cfg) = classify(&op.kind)?;
    let left = op.child(0)?;
    let right = op.child(1)?;

    let (left_key, right_key) = if cfg.whole_row_key {
        (Vec::new(), Vec::new())
    } else {
        let left_specs = op
            .param("leftKey")?
            .as_array()
            .ok_or_else(|| ExecError::plan("joinHash: leftKey must be an array"))?;
        let right_specs = op
            .param("rightKey")?
            .as_array()
            .ok_or_else(|| ExecError::plan("joinHash: rightKey must be an array"))?;
        (
            ctx.exprs.compile_all(left_specs, &left.labels)?,
            ctx.exprs.compile_all(right_specs, &right.labels)?,
        )
    };

    let mut map = ctx.stores.alloc_map()?;
    let mut chunks = if cfg.chain {
        Some(ctx.stores.alloc_chunks()?)
    } else {
        None
    };

    let result = run(
        ctx,
        vars,
        sink,
        kind,
        &cfg,
        left,
        right,
        &left_key,
        &right_key,
        map.as_mut(),
        chunks.as_deref_mut(),
    );

    if let Some(chunks) = chunks {
        ctx.stores.recycle_chunks(chunks);
    }
    ctx.stores.recycle_map(map);
    result
}

#[allow(clippy::too_many_arguments)]
fn run(
    ctx: &ExecCtx,
    vars: &Vars,
    sink: &mut dyn RowSink,
    kind: HashKind,
    cfg: &HashCfg,
    left: &Op,
    right: &Op,
    left_key: &[BoxExpr],
    right_key: &[BoxExpr],
    map: &mut (dyn KvMap + 'static),
    mut chunks: Option<&mut (dyn ChunkStore + 'static)>,
) -> ExecResult<()> {
    // Phase 1: drain the left child into the map.
    {
        let mut build = BuildSink {
            ctx,
            vars,
            cfg,
            key_exprs: left_key,
            map: &mut *map,
            chunks: chunks.as_deref_mut(),
            key_buf: Vec::new(),
        };
        super::execute(ctx, left, vars, &mut build)?;
    }
    tracing::debug!(keys = map.len(), kind = ?kind, "hash build complete");

    // Phase 2: drain the right child, probing.
    {
        let mut probe = ProbeSink {
            ctx,
            vars,
            kind,
            cfg,
            key_exprs: right_key,
            map: &mut *map,
            chunks: chunks.as_deref_mut(),
            parent: &mut *sink,
            key_buf: Vec::new(),
        };
        super::execute(ctx, right, vars, &mut probe)?;
    }

    // Phase 3: emit entries never probed, per kind.
    if cfg.emit_unprobed {
        let right_width = right.labels.len();
        let mut deferred: Option<ExecError> = None;
        map.visit(&mut |key, value| {
            let outcome = emit_unprobed(ctx, sink, kind, cfg, key, value, chunks.as_deref_mut(), right_width);
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
    }
    Ok(())
}

/// Computes a probe key: the canonicalized whole row, or the canonical
/// framing of the projected key expressions.
fn probe_key(
    ctx: &ExecCtx,
    vars: &Vars,
    cfg: &HashCfg,
    key_exprs: &[BoxExpr],
    row: &[&[u8]],
    out: &mut Vec<u8>,
) -> ExecResult<()> {
    out.clear();
    if cfg.whole_row_key {
        encode_row_canonical(row, out)?;
        return Ok(());
    }
    let mut vals: Vec<Vec<u8>> = Vec::with_capacity(key_exprs.len());
    for expr in key_exprs {
        vals.push(expr.eval(ctx, vars, row)?.into_owned());
    }
    let refs: Vec<&[u8]> = vals.iter().map(|v| v.as_slice()).collect();
    encode_row_canonical(&refs, out)?;
    Ok(())
}

struct BuildSink<'a, 's> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    cfg: &'a HashCfg,
    key_exprs: &'a [BoxExpr],
    map: &'s mut (dyn KvMap + 'static),
    chunks: Option<&'s mut (dyn ChunkStore + 'static)>,
    key_buf: Vec<u8>,
}

impl BuildSink<'_, '_> {
    fn append_chain(
        chunks: &mut Option<&mut (dyn ChunkStore + 'static)>,
        prev: (u64, u64),
        row: &[&[u8]],
    ) -> ExecResult<(u64, u64)> {
        let chunks = chunks
            .as_deref_mut()
            .ok_or_else(|| ExecError::plan("hash join: chain store missing"))?;
        let mut record = Vec::new();
        record.extend_from_slice(&prev.0.to_le_bytes());
        record.extend_from_slice(&prev.1.to_le_bytes());
        encode_row(row, &mut record);
        Ok(chunks.append(&record)?)
    }
}

impl RowSink for BuildSink<'_, '_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        let mut key = std::mem::take(&mut self.key_buf);
        probe_key(self.ctx, self.vars, self.cfg, self.key_exprs, row, &mut key)?;

        let existing = match self.map.get(&key)? {
            Some(slot) => Some(MapEntry::decode(self.cfg, slot)?),
            None => None,
        };

        match existing {
            Some(mut entry) => {
                if self.cfg.left_count {
                    entry.left += 1;
                }
                if self.cfg.chain {
                    let tail = Self::append_chain(
                        &mut self.chunks,
                        (entry.chain_off, entry.chain_size),
                        row,
                    )?;
                    entry.chain_off = tail.0;
                    entry.chain_size = tail.1;
                }
                if let Some(slot) = self.map.get(&key)? {
                    entry.store(self.cfg, slot);
                }
            }
            None => {
                let mut entry = MapEntry {
                    left: 1,
                    ..Default::default()
                };
                if self.cfg.chain {
                    let tail = Self::append_chain(&mut self.chunks, (0, 0), row)?;
                    entry.chain_off = tail.0;
                    entry.chain_size = tail.1;
                }
                let mut value = Vec::with_capacity(32);
                entry.encode(self.cfg, &mut value);
                self.map.set(&key, &value)?;
            }
        }

        self.key_buf = key;
        Ok(())
    }
}

struct ProbeSink<'a, 's> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    kind: HashKind,
    cfg: &'a HashCfg,
    key_exprs: &'a [BoxExpr],
    map: &'s mut (dyn KvMap + 'static),
    chunks: Option<&'s mut (dyn ChunkStore + 'static)>,
    parent: &'s mut dyn RowSink,
    key_buf: Vec<u8>,
}

impl RowSink for ProbeSink<'_, '_> {
    fn on_row(&mut self, right_row: &[&[u8]]) -> ExecResult<()> {
        let mut key = std::mem::take(&mut self.key_buf);
        probe_key(self.ctx, self.vars, self.cfg, self.key_exprs, right_row, &mut key)?;

        let entry = match self.map.get(&key)? {
            Some(slot) => {
                let mut entry = MapEntry::decode(self.cfg, slot)?;
                if self.cfg.probe_count {
                    entry.probe += 1;
                    entry.store(self.cfg, slot);
                }
                Some(entry)
            }
            None => None,
        };

        if let Some(entry) = entry {
            match self.kind {
                HashKind::Inner | HashKind::LeftOuter => {
                    let chunks = self
                        .chunks
                        .as_deref_mut()
                        .ok_or_else(|| ExecError::plan("hash join: chain store missing"))?;
                    walk_chain(chunks, entry.chain_off, entry.chain_size, &mut |left_row| {
                        let mut combined: Vec<&[u8]> =
                            Vec::with_capacity(left_row.len() + right_row.len());
                        combined.extend_from_slice(left_row);
                        combined.extend_from_slice(right_row);
                        self.parent.on_row(&combined)
                    })?;
                }
                HashKind::IntersectDistinct => {
                    if entry.probe == 1 {
                        emit_key_row(self.parent, &key, 1)?;
                    }
                }
                HashKind::IntersectAll => {
                    if entry.probe <= entry.left {
                        emit_key_row(self.parent, &key, 1)?;
                    }
                }
                HashKind::ExceptAll | HashKind::ExceptDistinct => {}
            }
        }

        self.key_buf = key;
        Ok(())
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}

/// Walks a chain from its stored tail backward, decoding each record's row.
fn walk_chain(
    chunks: &mut (dyn ChunkStore + 'static),
    mut offset: u64,
    mut size: u64,
    emit: &mut dyn FnMut(&[&[u8]]) -> ExecResult<()>,
) -> ExecResult<()> {
    while size != 0 {
        let mut record = Vec::new();
        chunks.read(offset, size, &mut record)?;
        if record.len() < 16 {
            return Err(ExecError::plan("hash join: corrupt chain record"));
        }
        let prev_off = u64::from_le_bytes(record[..8].try_into().unwrap_or_default());
        let prev_size = u64::from_le_bytes(record[8..16].try_into().unwrap_or_default());

        let mut row = Vec::new();
        decode_row(&record[16..], &mut row)?;
        emit(&row)?;

        offset = prev_off;
        size = prev_size;
    }
    Ok(())
}

/// Decodes a whole-row key back into a row and emits it `copies` times.
fn emit_key_row(sink: &mut dyn RowSink, key: &[u8], copies: u64) -> ExecResult<()> {
    let mut row = Vec::new();
    decode_row(key, &mut row)?;
    for _ in 0..copies {
        sink.on_row(&row)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_unprobed(
    _ctx: &ExecCtx,
    sink: &mut dyn RowSink,
    kind: HashKind,
    cfg: &HashCfg,
    key: &[u8],
    value: &[u8],
    chunks: Option<&mut (dyn ChunkStore + 'static)>,
    right_width: usize,
) -> ExecResult<()> {
    let entry = MapEntry::decode(cfg, value)?;
    if entry.probe != 0 {
        return Ok(());
    }
    match kind {
        HashKind::LeftOuter => {
            let chunks =
                chunks.ok_or_else(|| ExecError::plan("hash join: chain store missing"))?;
            walk_chain(chunks, entry.chain_off, entry.chain_size, &mut |left_row| {
                let mut combined: Vec<&[u8]> = left_row.to_vec();
                combined.resize(left_row.len() + right_width, MISSING);
                sink.on_row(&combined)
            })
        }
        HashKind::ExceptAll => emit_key_row(sink, key, entry.left),
        HashKind::ExceptDistinct => emit_key_row(sink, key, 1),
        _ => Ok(()),
    }
}
