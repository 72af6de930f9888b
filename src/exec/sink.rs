//! Row delivery protocol
//!
//! Operators push rows to their parent through a [`RowSink`]. Each operator
//! wraps its parent's sink with its own transform and drives its child
//! synchronously, so the whole tree executes as one call stack.
//!
//! Row data handed to `on_row` is borrowed and only valid for the duration
//! of the call; a consumer that retains rows owns a deep copy.
//! Termination travels through the `Result` returned by
//! [`execute`](super::execute): `Ok` is end-of-rows, `Err` abandons the
//! subtree, and ancestors finalize on the way out in both cases.

use crate::value::copy_row;

use super::errors::{ExecError, ExecResult};

/// Progress snapshot emitted periodically by long-running operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Rows produced so far by the emitting operator.
    pub rows: u64,
}

/// Receiver side of the execution protocol.
pub trait RowSink {
    /// Accepts one output row. Values are borrowed for the call's duration.
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()>;

    /// Accepts a progress checkpoint.
    ///
    /// Returning an error is the cooperative early-termination mechanism:
    /// the emitting operator stops and propagates it.
    fn on_stats(&mut self, _stats: &ScanStats) -> ExecResult<()> {
        Ok(())
    }
}

/// Sink that deep-copies every row; the caller-facing terminal sink.
#[derive(Debug, Default)]
pub struct RowCollector {
    /// Collected rows, in arrival order.
    pub rows: Vec<Vec<Vec<u8>>>,
}

impl RowCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collected rows rendered as UTF-8 strings, for assertions.
    pub fn as_strings(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| String::from_utf8_lossy(v).into_owned())
                    .collect()
            })
            .collect()
    }
}

impl RowSink for RowCollector {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        self.rows.push(copy_row(row));
        Ok(())
    }
}

/// Collector that halts the producer after a row budget is reached.
///
/// Rows are accepted until the budget is exhausted; the halt travels
/// through the next stats checkpoint, which is the documented pushdown
/// path for LIMIT.
#[derive(Debug)]
pub struct BudgetCollector {
    /// Collected rows, capped at the budget.
    pub rows: Vec<Vec<Vec<u8>>>,
    budget: usize,
}

impl BudgetCollector {
    /// Creates a collector that stops the producer after `budget` rows.
    pub fn new(budget: usize) -> Self {
        Self {
            rows: Vec::new(),
            budget,
        }
    }
}

impl RowSink for BudgetCollector {
    fn on_row(&mut self, row: &[&[u8]]) -> ExecResult<()> {
        if self.rows.len() < self.budget {
            self.rows.push(copy_row(row));
        }
        Ok(())
    }

    fn on_stats(&mut self, _stats: &ScanStats) -> ExecResult<()> {
        if self.rows.len() >= self.budget {
            return Err(ExecError::Halted("row budget reached".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_deep_copies() {
        let mut collector = RowCollector::new();
        {
            let transient = vec![b"1".to_vec(), b"2".to_vec()];
            let refs: Vec<&[u8]> = transient.iter().map(|v| v.as_slice()).collect();
            collector.on_row(&refs).unwrap();
        }
        assert_eq!(collector.as_strings(), vec![vec!["1", "2"]]);
    }

    #[test]
    fn test_budget_collector_halts_at_checkpoint() {
        let mut collector = BudgetCollector::new(1);
        let row = vec![b"x".to_vec()];
        let refs: Vec<&[u8]> = row.iter().map(|v| v.as_slice()).collect();

        collector.on_row(&refs).unwrap();
        collector.on_row(&refs).unwrap();
        assert_eq!(collector.rows.len(), 1);
        assert!(matches!(
            collector.on_stats(&ScanStats { rows: 2 }),
            Err(ExecError::Halted(_))
        ));
    }
}
