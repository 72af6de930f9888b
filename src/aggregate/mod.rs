//! Aggregate function catalog
//!
//! An aggregate is a named, side-effect-free `init`/`update`/`result`
//! triple over an opaque byte accumulator. Grouping concatenates one
//! accumulator segment per configured aggregate into a single growable
//! buffer per group key; each call consumes its own segment from the front
//! of the buffer and reports how many bytes it took.
//!
//! The catalog is an explicit registry value carried in the execution
//! context, keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::exec::{ExecCtx, ExecError, ExecResult};
use crate::value::{canonical_json, NULL};

/// One aggregate function.
pub trait Aggregate: Send + Sync {
    /// Appends the initial accumulator state.
    fn init(&self, acc: &mut Vec<u8>);

    /// Folds one input value into the state read from the front of `old`,
    /// appending the new state to `new`. Returns bytes consumed from `old`.
    ///
    /// `input` is the evaluated aggregate-input expression; `missing` inputs
    /// are skipped by every standard aggregate.
    fn update(
        &self,
        ctx: &ExecCtx,
        input: &[u8],
        old: &[u8],
        new: &mut Vec<u8>,
    ) -> ExecResult<usize>;

    /// Materializes the final value from the front of `acc`, appending its
    /// JSON encoding to `out`. Returns bytes consumed from `acc`.
    fn result(&self, ctx: &ExecCtx, acc: &[u8], out: &mut Vec<u8>) -> ExecResult<usize>;
}

/// Registry of aggregate functions, keyed by name.
pub struct AggCatalog {
    entries: HashMap<String, Arc<dyn Aggregate>>,
}

impl AggCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Creates the catalog with the standard aggregate set.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.register("count", Arc::new(Count));
        catalog.register("sum", Arc::new(Sum));
        catalog.register("avg", Arc::new(Avg));
        catalog.register("min", Arc::new(Extremum { want_max: false }));
        catalog.register("max", Arc::new(Extremum { want_max: true }));
        catalog
    }

    /// Registers (or replaces) a named aggregate.
    pub fn register(&mut self, name: impl Into<String>, agg: Arc<dyn Aggregate>) {
        self.entries.insert(name.into(), agg);
    }

    /// Looks up an aggregate by name.
    pub fn get(&self, name: &str) -> ExecResult<Arc<dyn Aggregate>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ExecError::plan(format!("unknown aggregate: {name}")))
    }
}

impl Default for AggCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn read_u64(buf: &[u8]) -> ExecResult<u64> {
    let raw: [u8; 8] = buf
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ExecError::plan("aggregate state truncated"))?;
    Ok(u64::from_le_bytes(raw))
}

fn read_f64(buf: &[u8]) -> ExecResult<f64> {
    Ok(f64::from_bits(read_u64(buf)?))
}

fn parse_number(input: &[u8]) -> Option<f64> {
    serde_json::from_slice::<serde_json::Value>(input)
        .ok()
        .and_then(|v| v.as_f64())
}

/// Writes a numeric result in canonical form (integral values without a
/// fractional part).
fn write_number(value: f64, out: &mut Vec<u8>) {
    if value.is_finite() && value == value.trunc() && value.abs() < 9_007_199_254_740_992.0 {
        out.extend_from_slice((value as i64).to_string().as_bytes());
    } else {
        out.extend_from_slice(value.to_string().as_bytes());
    }
}

/// `count`: an 8-byte little-endian counter of non-missing, non-null inputs.
struct Count;

impl Aggregate for Count {
    fn init(&self, acc: &mut Vec<u8>) {
        acc.extend_from_slice(&0u64.to_le_bytes());
    }

    fn update(
        &self,
        _ctx: &ExecCtx,
        input: &[u8],
        old: &[u8],
        new: &mut Vec<u8>,
    ) -> ExecResult<usize> {
        let mut count = read_u64(old)?;
        if !input.is_empty() && input != NULL {
            count += 1;
        }
        new.extend_from_slice(&count.to_le_bytes());
        Ok(8)
    }

    fn result(&self, _ctx: &ExecCtx, acc: &[u8], out: &mut Vec<u8>) -> ExecResult<usize> {
        let count = read_u64(acc)?;
        out.extend_from_slice(count.to_string().as_bytes());
        Ok(8)
    }
}

/// `sum`: an 8-byte float accumulator; non-numeric inputs are skipped.
struct Sum;

impl Aggregate for Sum {
    fn init(&self, acc: &mut Vec<u8>) {
        acc.extend_from_slice(&0f64.to_bits().to_le_bytes());
    }

    fn update(
        &self,
        _ctx: &ExecCtx,
        input: &[u8],
        old: &[u8],
        new: &mut Vec<u8>,
    ) -> ExecResult<usize> {
        let mut sum = read_f64(old)?;
        if let Some(n) = parse_number(input) {
            sum += n;
        }
        new.extend_from_slice(&sum.to_bits().to_le_bytes());
        Ok(8)
    }

    fn result(&self, _ctx: &ExecCtx, acc: &[u8], out: &mut Vec<u8>) -> ExecResult<usize> {
        write_number(read_f64(acc)?, out);
        Ok(8)
    }
}

/// `avg`: a count and a sum; result is their quotient, null for no inputs.
struct Avg;

impl Aggregate for Avg {
    fn init(&self, acc: &mut Vec<u8>) {
        acc.extend_from_slice(&0u64.to_le_bytes());
        acc.extend_from_slice(&0f64.to_bits().to_le_bytes());
    }

    fn update(
        &self,
        _ctx: &ExecCtx,
        input: &[u8],
        old: &[u8],
        new: &mut Vec<u8>,
    ) -> ExecResult<usize> {
        let mut count = read_u64(old)?;
        let mut sum = read_f64(&old[8..])?;
        if let Some(n) = parse_number(input) {
            count += 1;
            sum += n;
        }
        new.extend_from_slice(&count.to_le_bytes());
        new.extend_from_slice(&sum.to_bits().to_le_bytes());
        Ok(16)
    }

    fn result(&self, _ctx: &ExecCtx, acc: &[u8], out: &mut Vec<u8>) -> ExecResult<usize> {
        let count = read_u64(acc)?;
        let sum = read_f64(&acc[8..])?;
        if count == 0 {
            out.extend_from_slice(NULL);
        } else {
            write_number(sum / count as f64, out);
        }
        Ok(16)
    }
}

/// `min`/`max`: a length-prefixed canonical encoding of the best value seen.
///
/// The variable-width state exercises grouping's grow-and-replace path.
struct Extremum {
    want_max: bool,
}

impl Extremum {
    fn read_state(acc: &[u8]) -> ExecResult<(&[u8], usize)> {
        let len = read_u64(acc)? as usize;
        let state = acc
            .get(8..8 + len)
            .ok_or_else(|| ExecError::plan("aggregate state truncated"))?;
        Ok((state, 8 + len))
    }
}

impl Aggregate for Extremum {
    fn init(&self, acc: &mut Vec<u8>) {
        acc.extend_from_slice(&0u64.to_le_bytes());
    }

    fn update(
        &self,
        ctx: &ExecCtx,
        input: &[u8],
        old: &[u8],
        new: &mut Vec<u8>,
    ) -> ExecResult<usize> {
        let (best, consumed) = Self::read_state(old)?;
        let keep_best = if input.is_empty() {
            true
        } else if best.is_empty() {
            false
        } else {
            let ord = ctx.comparer().compare_bytes(input, best);
            if self.want_max {
                ord != std::cmp::Ordering::Greater
            } else {
                ord != std::cmp::Ordering::Less
            }
        };

        if keep_best {
            new.extend_from_slice(&(best.len() as u64).to_le_bytes());
            new.extend_from_slice(best);
        } else {
            let mut canon = Vec::new();
            canonical_json(input, &mut canon)?;
            new.extend_from_slice(&(canon.len() as u64).to_le_bytes());
            new.extend_from_slice(&canon);
        }
        Ok(consumed)
    }

    fn result(&self, _ctx: &ExecCtx, acc: &[u8], out: &mut Vec<u8>) -> ExecResult<usize> {
        let (best, consumed) = Self::read_state(acc)?;
        if best.is_empty() {
            out.extend_from_slice(NULL);
        } else {
            out.extend_from_slice(best);
        }
        Ok(consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold(name: &str, inputs: &[&str]) -> String {
        let ctx = ExecCtx::default();
        let agg = ctx.aggs.get(name).unwrap();

        let mut acc = Vec::new();
        agg.init(&mut acc);
        for input in inputs {
            let mut next = Vec::new();
            agg.update(&ctx, input.as_bytes(), &acc, &mut next).unwrap();
            acc = next;
        }
        let mut out = Vec::new();
        agg.result(&ctx, &acc, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_count_skips_missing_and_null() {
        assert_eq!(fold("count", &["1", "", "null", "2"]), "2");
        assert_eq!(fold("count", &[]), "0");
    }

    #[test]
    fn test_sum_and_avg() {
        assert_eq!(fold("sum", &["1", "2", "3.5"]), "6.5");
        assert_eq!(fold("sum", &["1", "x", "2"]), "3");
        assert_eq!(fold("avg", &["1", "2", "3"]), "2");
        assert_eq!(fold("avg", &[]), "null");
    }

    #[test]
    fn test_min_max() {
        assert_eq!(fold("min", &["3", "1", "2"]), "1");
        assert_eq!(fold("max", &["3", "1", "2"]), "3");
        assert_eq!(fold("max", &[r#""a""#, r#""c""#, r#""b""#]), r#""c""#);
        assert_eq!(fold("min", &[]), "null");
    }

    #[test]
    fn test_min_state_canonicalizes() {
        // 1.0 and 1 are the same value; stored state must be canonical.
        assert_eq!(fold("min", &["2", "1.0"]), "1");
    }

    #[test]
    fn test_segments_compose_in_one_buffer() {
        let ctx = ExecCtx::default();
        let count = ctx.aggs.get("count").unwrap();
        let max = ctx.aggs.get("max").unwrap();

        let mut acc = Vec::new();
        count.init(&mut acc);
        max.init(&mut acc);

        for input in ["5", "9", "7"] {
            let mut next = Vec::new();
            let mut rest: &[u8] = &acc;
            let used = count
                .update(&ctx, input.as_bytes(), rest, &mut next)
                .unwrap();
            rest = &rest[used..];
            max.update(&ctx, input.as_bytes(), rest, &mut next).unwrap();
            acc = next;
        }

        let mut out = Vec::new();
        let used = count.result(&ctx, &acc, &mut out).unwrap();
        out.push(b'|');
        max.result(&ctx, &acc[used..], &mut out).unwrap();
        assert_eq!(out, b"3|9");
    }

    #[test]
    fn test_unknown_aggregate_is_plan_error() {
        let catalog = AggCatalog::standard();
        assert!(catalog.get("median").is_err());
    }
}
