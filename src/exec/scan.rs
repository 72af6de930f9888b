//! Delimited-record scan
//!
//! Reads comma-delimited textual records, one row per line, either from a
//! literal string in the plan (`["csv", data]`) or from a file
//! (`["csvFile", path]`). Fields are split on commas with no quoting
//! awareness; each field's bytes are carried through verbatim as one value.
//!
//! Every `stats_cadence` rows the scan emits a checkpoint; a sink error from
//! the checkpoint aborts the scan with that error, which is how LIMIT
//! pushdown terminates a producer early.

use std::fs::File;
use std::io::{BufRead, BufReader};

use super::context::{ExecCtx, Vars};
use super::errors::{ExecError, ExecResult};
use super::op::Op;
use super::sink::{RowSink, ScanStats};
use crate::value::MISSING;

pub(super) fn execute(
    ctx: &ExecCtx,
    op: &Op,
    _vars: &Vars,
    sink: &mut dyn RowSink,
) -> ExecResult<()> {
    let params = op.params_array()?;
    let source = params
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecError::plan("scan: missing source kind"))?;
    let arg = params
        .get(1)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ExecError::plan("scan: missing source argument"))?;

    let mut emitter = Emitter {
        width: op.labels.len(),
        cadence: ctx.config.stats_cadence,
        rows: 0,
        sink,
    };

    match source {
        "csv" => {
            for line in arg.split('\n') {
                emitter.emit_line(line)?;
            }
        }
        "csvFile" => {
            let reader = BufReader::new(File::open(arg)?);
            for line in reader.lines() {
                emitter.emit_line(&line?)?;
            }
        }
        other => return Err(ExecError::plan(format!("scan: unknown source {other:?}"))),
    }

    tracing::debug!(rows = emitter.rows, "scan complete");
    Ok(())
}

struct Emitter<'a> {
    width: usize,
    cadence: u64,
    rows: u64,
    sink: &'a mut dyn RowSink,
}

impl Emitter<'_> {
    fn emit_line(&mut self, line: &str) -> ExecResult<()> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Ok(());
        }

        let mut row: Vec<&[u8]> = line.split(',').map(str::as_bytes).collect();
        // Align to the declared labels: pad short records with missing,
        // drop extra fields.
        row.resize(self.width, MISSING);

        self.sink.on_row(&row)?;
        self.rows += 1;
        if self.cadence > 0 && self.rows % self.cadence == 0 {
            self.sink.on_stats(&ScanStats { rows: self.rows })?;
        }
        Ok(())
    }
}
