//! Window frame state machine
//!
//! A [`WindowFrame`] is a per-window-function cursor over an immutable frame
//! configuration. It is reinitialized once per partition
//! (`partition_start`) and advanced once per row (`current_update`), which
//! recomputes the `Include` span and the exclusion list for the current
//! position. Window functions consume the cursor through `count`, `next`
//! and `prev`.
//!
//! ROWS boundaries offset by physical position; GROUPS boundaries step
//! whole runs of equal ranking values; RANGE boundaries admit positions
//! whose ranking value lies within `[current+begin, current+end]` and
//! require an ascending order column; a descending RANGE frame is refused
//! at construction. The `group` and `ties` exclusion modes are likewise
//! refused rather than approximated.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::exec::context::{ExecCtx, TempSlot, Vars};
use crate::exec::errors::{ExecError, ExecResult};
use crate::exec::op::Op;
use crate::exec::sink::{RowSink, ScanStats};
use crate::store::RowHeap;
use crate::value::decode_pair_projected;

use super::WindowState;

/// Frame computation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Physical row offsets.
    Rows,
    /// Numeric distance on the ranking column.
    Range,
    /// Whole runs of equal ranking values.
    Groups,
}

/// One frame boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameBound {
    /// The partition edge.
    Unbounded,
    /// Signed offset from the current row/group/value; zero is the current
    /// row.
    Delta(f64),
}

/// Positions removed from the include span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameExclude {
    /// Keep everything.
    None,
    /// Remove the current row.
    CurrentRow,
}

/// Immutable frame configuration.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Computation mode.
    pub typ: FrameType,
    /// Lower boundary.
    pub begin: FrameBound,
    /// Upper boundary.
    pub end: FrameBound,
    /// Exclusion mode.
    pub exclude: FrameExclude,
    /// Index of the ranking column within the partition buffer's projected
    /// values.
    pub val_idx: usize,
    /// Whether the order column is descending.
    pub descending: bool,
}

impl FrameConfig {
    /// Parses one frame configuration from plan params, refusing the
    /// combinations the engine does not implement.
    pub fn parse(spec: &Value) -> ExecResult<Self> {
        let typ = match spec.get("type").and_then(|v| v.as_str()) {
            Some("rows") => FrameType::Rows,
            Some("range") => FrameType::Range,
            Some("groups") => FrameType::Groups,
            other => return Err(ExecError::plan(format!("frame: bad type {other:?}"))),
        };
        let begin = Self::parse_bound(spec.get("begin"))?;
        let end = Self::parse_bound(spec.get("end"))?;
        let exclude = match spec.get("exclude").and_then(|v| v.as_str()) {
            None | Some("none") => FrameExclude::None,
            Some("current-row") => FrameExclude::CurrentRow,
            Some(mode @ ("group" | "ties")) => {
                return Err(ExecError::Unsupported(format!(
                    "frame exclusion mode {mode:?}"
                )))
            }
            Some(other) => return Err(ExecError::plan(format!("frame: bad exclude {other:?}"))),
        };
        let val_idx = spec
            .get("valIdx")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let descending = spec
            .get("desc")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if typ == FrameType::Range && descending {
            return Err(ExecError::Unsupported(
                "range framing over a descending order column".into(),
            ));
        }

        Ok(Self {
            typ,
            begin,
            end,
            exclude,
            val_idx,
            descending,
        })
    }

    fn parse_bound(spec: Option<&Value>) -> ExecResult<FrameBound> {
        match spec {
            None => Ok(FrameBound::Unbounded),
            Some(Value::String(s)) if s == "unbounded" => Ok(FrameBound::Unbounded),
            Some(Value::String(s)) if s == "current" => Ok(FrameBound::Delta(0.0)),
            Some(Value::Array(pair)) if pair.len() == 2 => {
                let offset = pair[1]
                    .as_f64()
                    .ok_or_else(|| ExecError::plan("frame: bound offset must be numeric"))?;
                match pair[0].as_str() {
                    Some("preceding") => Ok(FrameBound::Delta(-offset)),
                    Some("following") => Ok(FrameBound::Delta(offset)),
                    _ => Err(ExecError::plan("frame: bound kind must be preceding/following")),
                }
            }
            Some(other) => Err(ExecError::plan(format!("frame: bad bound {other}"))),
        }
    }
}

/// Half-open position span `[beg, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSpan {
    /// First included position.
    pub beg: usize,
    /// One past the last included position.
    pub end: usize,
}

impl WindowSpan {
    /// Span length.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.beg)
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.end <= self.beg
    }

    /// Whether `pos` falls inside the span.
    pub fn contains(&self, pos: usize) -> bool {
        self.beg <= pos && pos < self.end
    }
}

/// Per-window-function frame cursor.
pub struct WindowFrame {
    cfg: FrameConfig,
    /// Current row position within the partition.
    pub pos: usize,
    /// Included span for the current position.
    pub include: WindowSpan,
    /// Spans removed from the include span.
    pub excludes: Vec<WindowSpan>,
    record_buf: Vec<u8>,
    val_buf: Vec<u8>,
}

impl WindowFrame {
    /// Creates a cursor for one configuration.
    pub fn new(cfg: FrameConfig) -> Self {
        Self {
            cfg,
            pos: 0,
            include: WindowSpan::default(),
            excludes: Vec::new(),
            record_buf: Vec::new(),
            val_buf: Vec::new(),
        }
    }

    /// Resets the cursor at a partition boundary.
    pub fn partition_start(&mut self) {
        self.pos = 0;
        self.include = WindowSpan::default();
        self.excludes.clear();
    }

    /// Recomputes the frame for the row at `pos` over the partition buffer.
    pub fn current_update(
        &mut self,
        pos: usize,
        heap: &mut dyn RowHeap,
        ctx: &ExecCtx,
    ) -> ExecResult<()> {
        let len = heap.len();
        self.pos = pos;

        let beg = match self.cfg.begin {
            FrameBound::Unbounded => 0,
            FrameBound::Delta(d) => match self.cfg.typ {
                FrameType::Rows => clamp_pos(pos as i64 + d as i64, len),
                FrameType::Groups => self.step_group_begin(heap, ctx, pos, d as i64, len)?,
                FrameType::Range => self.range_begin(heap, ctx, pos, d, len)?,
            },
        };
        let end = match self.cfg.end {
            FrameBound::Unbounded => len,
            FrameBound::Delta(d) => match self.cfg.typ {
                FrameType::Rows => clamp_pos(pos as i64 + d as i64 + 1, len),
                FrameType::Groups => self.step_group_end(heap, ctx, pos, d as i64, len)?,
                FrameType::Range => self.range_end(heap, ctx, pos, d, len)?,
            },
        };
        self.include = WindowSpan {
            beg: beg.min(end),
            end,
        };

        self.excludes.clear();
        if self.cfg.exclude == FrameExclude::CurrentRow {
            self.excludes.push(WindowSpan {
                beg: pos,
                end: pos + 1,
            });
        }
        Ok(())
    }

    /// Positions visible to the window function: included minus excluded.
    pub fn count(&self) -> usize {
        let mut count = self.include.len();
        for excluded in &self.excludes {
            let lo = excluded.beg.max(self.include.beg);
            let hi = excluded.end.min(self.include.end);
            count -= hi.saturating_sub(lo);
        }
        count
    }

    /// First visible position after `after`, or the first overall when
    /// `after` is `None`.
    pub fn next(&self, after: Option<usize>) -> Option<usize> {
        let mut i = match after {
            Some(a) => a + 1,
            None => self.include.beg,
        };
        while i < self.include.end {
            if !self.is_excluded(i) {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Last visible position before `before`, or the last overall when
    /// `before` is `None`.
    pub fn prev(&self, before: Option<usize>) -> Option<usize> {
        let mut i = match before {
            Some(b) if b > self.include.beg => b - 1,
            Some(_) => return None,
            None if self.include.is_empty() => return None,
            None => self.include.end - 1,
        };
        loop {
            if !self.is_excluded(i) {
                return Some(i);
            }
            if i == self.include.beg {
                return None;
            }
            i -= 1;
        }
    }

    fn is_excluded(&self, pos: usize) -> bool {
        self.excludes.iter().any(|s| s.contains(pos))
    }

    /// Ranking value of the buffered row at `i`.
    fn value_at(&mut self, heap: &mut dyn RowHeap, i: usize) -> ExecResult<()> {
        heap.get(i, &mut self.record_buf)?;
        let mut projected = Vec::new();
        decode_pair_projected(&self.record_buf, &mut projected)?;
        let val = projected
            .get(self.cfg.val_idx)
            .copied()
            .ok_or_else(|| ExecError::plan("frame: ranking column out of range"))?;
        self.val_buf.clear();
        self.val_buf.extend_from_slice(val);
        Ok(())
    }

    fn values_equal(
        &mut self,
        heap: &mut dyn RowHeap,
        ctx: &ExecCtx,
        a: usize,
        b: usize,
    ) -> ExecResult<bool> {
        self.value_at(heap, a)?;
        let left = std::mem::take(&mut self.val_buf);
        self.value_at(heap, b)?;
        let equal = ctx.comparer().compare_bytes(&left, &self.val_buf) == std::cmp::Ordering::Equal;
        self.val_buf = left;
        Ok(equal)
    }

    /// Start position of the group containing `i`.
    fn find_group_start(
        &mut self,
        heap: &mut dyn RowHeap,
        ctx: &ExecCtx,
        mut i: usize,
    ) -> ExecResult<usize> {
        while i > 0 && self.values_equal(heap, ctx, i - 1, i)? {
            i -= 1;
        }
        Ok(i)
    }

    /// Exclusive end position of the group containing `i`.
    fn find_group_edge(
        &mut self,
        heap: &mut dyn RowHeap,
        ctx: &ExecCtx,
        mut i: usize,
        len: usize,
    ) -> ExecResult<usize> {
        while i + 1 < len && self.values_equal(heap, ctx, i, i + 1)? {
            i += 1;
        }
        Ok(i + 1)
    }

    fn step_group_begin(
        &mut self,
        heap: &mut dyn RowHeap,
        ctx: &ExecCtx,
        pos: usize,
        steps: i64,
        len: usize,
    ) -> ExecResult<usize> {
        let mut beg = self.find_group_start(heap, ctx, pos)?;
        if steps < 0 {
            for _ in 0..(-steps) {
                if beg == 0 {
                    break;
                }
                beg = self.find_group_start(heap, ctx, beg - 1)?;
            }
        } else {
            for _ in 0..steps {
                beg = self.find_group_edge(heap, ctx, beg, len)?;
                if beg >= len {
                    break;
                }
            }
        }
        Ok(beg.min(len))
    }

    fn step_group_end(
        &mut self,
        heap: &mut dyn RowHeap,
        ctx: &ExecCtx,
        pos: usize,
        steps: i64,
        len: usize,
    ) -> ExecResult<usize> {
        let mut end = self.find_group_edge(heap, ctx, pos, len)?;
        if steps > 0 {
            for _ in 0..steps {
                if end >= len {
                    break;
                }
                end = self.find_group_edge(heap, ctx, end, len)?;
            }
        } else {
            for _ in 0..(-steps) {
                if end == 0 {
                    break;
                }
                end = self.find_group_start(heap, ctx, end - 1)?;
            }
        }
        Ok(end.min(len))
    }

    fn numeric_at(&mut self, heap: &mut dyn RowHeap, i: usize) -> ExecResult<f64> {
        self.value_at(heap, i)?;
        serde_json::from_slice::<Value>(&self.val_buf)
            .ok()
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ExecError::plan("frame: range framing requires a numeric order column"))
    }

    fn range_begin(
        &mut self,
        heap: &mut dyn RowHeap,
        _ctx: &ExecCtx,
        pos: usize,
        delta: f64,
        len: usize,
    ) -> ExecResult<usize> {
        let target = self.numeric_at(heap, pos)? + delta;
        for i in 0..len {
            if self.numeric_at(heap, i)? >= target {
                return Ok(i);
            }
        }
        Ok(len)
    }

    fn range_end(
        &mut self,
        heap: &mut dyn RowHeap,
        _ctx: &ExecCtx,
        pos: usize,
        delta: f64,
        len: usize,
    ) -> ExecResult<usize> {
        let target = self.numeric_at(heap, pos)? + delta;
        for i in (0..len).rev() {
            if self.numeric_at(heap, i)? <= target {
                return Ok(i + 1);
            }
        }
        Ok(0)
    }
}

fn clamp_pos(pos: i64, len: usize) -> usize {
    pos.clamp(0, len as i64) as usize
}

/// Window frames operator: pass-through that maintains the frame cursors in
/// the shared temp slot as each row flows by.
pub fn execute(ctx: &ExecCtx, op: &Op, vars: &Vars, sink: &mut dyn RowSink) -> ExecResult<()> {
    let child = op.child(0)?;
    let slot = op
        .param("slot")?
        .as_u64()
        .ok_or_else(|| ExecError::plan("window-frames: slot must be unsigned"))?
        as usize;

    let specs = op
        .param("frames")?
        .as_array()
        .ok_or_else(|| ExecError::plan("window-frames: frames must be an array"))?;
    let mut frames = Vec::with_capacity(specs.len());
    for spec in specs {
        frames.push(WindowFrame::new(FrameConfig::parse(spec)?));
    }

    let mut framer = FramesSink {
        ctx,
        vars,
        slot,
        pending_frames: frames,
        state: None,
        last_partition: None,
        pos: 0,
        parent: sink,
    };
    let result = crate::exec::execute(ctx, child, vars, &mut framer);

    // The partition operator below owns the slot's lifecycle; only the
    // cursors installed here are torn down.
    if let Some(state) = framer.state.take() {
        state.borrow_mut().frames.clear();
    }
    result
}

struct FramesSink<'a> {
    ctx: &'a ExecCtx,
    vars: &'a Vars,
    slot: usize,
    pending_frames: Vec<WindowFrame>,
    state: Option<Rc<RefCell<WindowState>>>,
    last_partition: Option<u64>,
    pos: usize,
    parent: &'a mut dyn RowSink,
}

impl RowSink for FramesSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        // The partition operator installs the slot when it starts running,
        // which is after this operator's setup; resolve on first row.
        let state = match &self.state {
            Some(state) => Rc::clone(state),
            None => {
                let Some(TempSlot::Windows(state)) = self.vars.temp(self.slot) else {
                    return Err(ExecError::plan(format!(
                        "window-frames: no partition state in slot {}",
                        self.slot
                    )));
                };
                state.borrow_mut().frames = std::mem::take(&mut self.pending_frames);
                self.state = Some(Rc::clone(&state));
                state
            }
        };

        {
            let mut shared = state.borrow_mut();
            let WindowState { heap, frames } = &mut *shared;
            let heap = heap
                .as_deref_mut()
                .ok_or_else(|| ExecError::plan("window-frames: no active partition buffer"))?;

            let partition = heap.tag();
            if self.last_partition != Some(partition) {
                for frame in frames.iter_mut() {
                    frame.partition_start();
                }
                self.pos = 0;
                self.last_partition = Some(partition);
            } else {
                self.pos += 1;
            }
            for frame in frames.iter_mut() {
                frame.current_update(self.pos, heap, self.ctx)?;
            }
        }

        self.parent.on_row(row)
    }

    fn on_stats(&mut self, stats: &ScanStats) -> ExecResult<()> {
        self.parent.on_stats(stats)
    }
}
