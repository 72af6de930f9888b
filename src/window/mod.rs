//! Window partitioning and framing
//!
//! Two cooperating operators share a temp slot: the partition operator
//! buffers each maximal run of rows with equal partitioning keys into an
//! indexable heap (stamping a partition id in the heap's tag), and the
//! frames operator maintains per-window-function frame cursors over that
//! buffer as each row is flushed through. Window functions are expressions
//! that consult the frame state through the same slot.

pub mod frame;
pub mod partition;

pub use frame::{FrameBound, FrameConfig, FrameExclude, FrameType, WindowFrame, WindowSpan};

use crate::exec::{ExecError, ExecResult};
use crate::store::RowHeap;

/// Shared state between the partition and frames operators.
#[derive(Default)]
pub struct WindowState {
    /// The current partition's buffered rows; present while the partition
    /// operator is active.
    pub heap: Option<Box<dyn RowHeap>>,

    /// Frame cursors, installed by the frames operator.
    pub frames: Vec<WindowFrame>,
}

impl WindowState {
    /// Creates empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffered partition, or an error if no partition operator is
    /// active below.
    pub fn heap_mut(&mut self) -> ExecResult<&mut (dyn RowHeap + 'static)> {
        self.heap
            .as_deref_mut()
            .ok_or_else(|| ExecError::plan("window: no active partition buffer"))
    }
}
