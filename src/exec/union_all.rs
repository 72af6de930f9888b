//! Concurrent union staging
//!
//! One actor thread per branch, each executing its child with an
//! independently cloned context and fresh scope, remapping branch rows onto
//! the union's output labels (missing for labels the branch lacks). Rows
//! travel to the coordinator in batches over one bounded channel, so slow
//! consumption applies backpressure to every branch.
//!
//! The coordinator forwards rows in receive order until it has seen one
//! completion sentinel per actor; output interleaving across branches is
//! therefore non-deterministic, while each branch's internal order is
//! preserved. The first error from any actor wins, a shared stop flag
//! makes the siblings drain out, and exactly that error is surfaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender};

use parking_lot::Mutex;

use crate::value::MISSING;

use super::context::{ExecCtx, Vars};
use super::errors::{ExecError, ExecResult};
use super::op::Op;
use super::sink::RowSink;

enum Message {
    Batch(Vec<Vec<Vec<u8>>>),
    Done,
}

pub(super) fn execute(
    ctx: &ExecCtx,
    op: &Op,
    _vars: &Vars,
    sink: &mut dyn RowSink,
) -> ExecResult<()> {
    if op.children.is_empty() {
        return Ok(());
    }

    let batch_size = ctx.config.union_batch_size.max(0) as usize;
    let branches = op.children.len();
    let (tx, rx) = sync_channel::<Message>(branches * 2);
    let first_error: Mutex<Option<ExecError>> = Mutex::new(None);
    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for child in &op.children {
            let mapping: Vec<Option<usize>> = op
                .labels
                .iter()
                .map(|label| child.labels.iter().position(|l| l == label))
                .collect();
            let branch_ctx = ctx.clone();
            let branch_tx = tx.clone();
            let first_error = &first_error;
            let stop = &stop;

            scope.spawn(move || {
                let vars = Vars::new();
                let mut branch = BranchSink {
                    mapping,
                    batch: Vec::new(),
                    batch_size,
                    tx: &branch_tx,
                    stop,
                };
                let result = super::execute(&branch_ctx, child, &vars, &mut branch)
                    .and_then(|()| branch.flush());
                if let Err(e) = result {
                    let mut latch = first_error.lock();
                    if latch.is_none() {
                        *latch = Some(e);
                    }
                    stop.store(true, Ordering::SeqCst);
                }
                // Completion sentinel, success or not; the coordinator
                // always drains, so this cannot deadlock.
                let _ = branch_tx.send(Message::Done);
            });
        }
        drop(tx);

        let mut pending = branches;
        let mut forwarding = true;
        while pending > 0 {
            match rx.recv() {
                Ok(Message::Batch(rows)) => {
                    if !forwarding {
                        continue;
                    }
                    for row in &rows {
                        let refs: Vec<&[u8]> = row.iter().map(|v| v.as_slice()).collect();
                        if let Err(e) = sink.on_row(&refs) {
                            let mut latch = first_error.lock();
                            if latch.is_none() {
                                *latch = Some(e);
                            }
                            stop.store(true, Ordering::SeqCst);
                            forwarding = false;
                            break;
                        }
                    }
                }
                Ok(Message::Done) => pending -= 1,
                Err(_) => break,
            }
        }
    });

    match first_error.into_inner() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

struct BranchSink<'a> {
    mapping: Vec<Option<usize>>,
    batch: Vec<Vec<Vec<u8>>>,
    /// Rows per batch; zero means one final batch at completion.
    batch_size: usize,
    tx: &'a SyncSender<Message>,
    stop: &'a AtomicBool,
}

impl BranchSink<'_> {
    fn flush(&mut self) -> ExecResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        self.tx
            .send(Message::Batch(batch))
            .map_err(|_| ExecError::Halted("union stage closed".into()))
    }
}

impl RowSink for BranchSink<'_> {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(ExecError::Halted("union stage stopped".into()));
        }

        let remapped: Vec<Vec<u8>> = self
            .mapping
            .iter()
            .map(|slot| match slot {
                Some(i) => row.get(*i).copied().unwrap_or(MISSING).to_vec(),
                None => Vec::new(),
            })
            .collect();
        self.batch.push(remapped);

        if self.batch_size > 0 && self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }
}
