//! Three-way comparison over JSON values
//!
//! Type precedence: missing < null < bool < number < string < array < object.
//! Values that fail to parse compare equal to each other and rank above
//! objects, so a malformed value never silently equals a well-formed one.
//!
//! A comparer owns reusable scratch buffers, so one instance must not be
//! shared between threads; each concurrent branch gets its own via
//! `ExecCtx::clone`.

use std::cmp::Ordering;

use serde_json::Value;

/// Reusable three-way comparer for encoded JSON values.
#[derive(Debug, Default)]
pub struct ValueComparer {
    /// Scratch for the sorted, deduplicated key union during object compare.
    key_scratch: Vec<String>,
}

/// Type rank position in the total order.
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 1,
        Value::Bool(_) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

impl ValueComparer {
    /// Creates a comparer with empty scratch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares two encoded JSON values.
    ///
    /// The empty slice is `missing` and sorts below everything; unparseable
    /// values sort above everything and equal to each other.
    pub fn compare_bytes(&mut self, a: &[u8], b: &[u8]) -> Ordering {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        let pa = serde_json::from_slice::<Value>(a);
        let pb = serde_json::from_slice::<Value>(b);
        match (pa, pb) {
            (Ok(va), Ok(vb)) => self.compare(&va, &vb),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => Ordering::Equal,
        }
    }

    /// Compares two parsed JSON values.
    pub fn compare(&mut self, a: &Value, b: &Value) -> Ordering {
        let (ra, rb) = (type_rank(a), type_rank(b));
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (a, b) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(x), Value::Number(y)) => {
                let fx = x.as_f64().unwrap_or(0.0);
                let fy = y.as_f64().unwrap_or(0.0);
                fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
            }
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => {
                for (ex, ey) in x.iter().zip(y.iter()) {
                    let ord = self.compare(ex, ey);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                // Lexicographic: on common-prefix equality the shorter
                // array sorts first.
                x.len().cmp(&y.len())
            }
            (Value::Object(x), Value::Object(y)) => {
                // Cardinality first: the object with more fields wins.
                if x.len() != y.len() {
                    return x.len().cmp(&y.len());
                }
                // Reuse the key scratch at this level; nested compares take
                // it over and hand it back.
                let mut keys = std::mem::take(&mut self.key_scratch);
                keys.clear();
                keys.extend(x.keys().cloned());
                keys.extend(y.keys().cloned());
                keys.sort_unstable();
                keys.dedup();

                let mut result = Ordering::Equal;
                for key in &keys {
                    result = match (x.get(key), y.get(key)) {
                        (None, None) => Ordering::Equal,
                        (None, Some(_)) => Ordering::Less,
                        (Some(_), None) => Ordering::Greater,
                        (Some(vx), Some(vy)) => self.compare(vx, vy),
                    };
                    if result != Ordering::Equal {
                        break;
                    }
                }
                self.key_scratch = keys;
                result
            }
            // Ranks already matched above; mixed-type pairs cannot reach here.
            _ => Ordering::Equal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp(a: &str, b: &str) -> Ordering {
        ValueComparer::new().compare_bytes(a.as_bytes(), b.as_bytes())
    }

    #[test]
    fn test_type_precedence() {
        let ordered = ["null", "false", "0", r#""""#, "[]", "{}"];
        for pair in ordered.windows(2) {
            assert_eq!(cmp(pair[0], pair[1]), Ordering::Less);
            assert_eq!(cmp(pair[1], pair[0]), Ordering::Greater);
        }
    }

    #[test]
    fn test_missing_sorts_first() {
        assert_eq!(cmp("", "null"), Ordering::Less);
        assert_eq!(cmp("", ""), Ordering::Equal);
    }

    #[test]
    fn test_scalar_antisymmetry_and_transitivity() {
        let scalars = ["1", "2", "3", r#""a""#, r#""b""#, r#""c""#];
        for a in scalars {
            for b in scalars {
                let ab = cmp(a, b);
                let ba = cmp(b, a);
                assert_eq!(ab, ba.reverse(), "antisymmetry failed for {a} {b}");
                for c in scalars {
                    if ab == Ordering::Less && cmp(b, c) == Ordering::Less {
                        assert_eq!(cmp(a, c), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn test_numbers_numeric_not_textual() {
        assert_eq!(cmp("9", "10"), Ordering::Less);
        assert_eq!(cmp("2.5", "2.50"), Ordering::Equal);
        assert_eq!(cmp("-1", "0"), Ordering::Less);
    }

    #[test]
    fn test_array_prefix_then_length() {
        assert_eq!(cmp("[1,2]", "[1,2,3]"), Ordering::Less);
        assert_eq!(cmp("[1,3]", "[1,2,3]"), Ordering::Greater);
        assert_eq!(cmp("[1,2]", "[1,2]"), Ordering::Equal);
    }

    #[test]
    fn test_object_cardinality_then_keys() {
        assert_eq!(cmp(r#"{"a":1}"#, r#"{"a":1,"b":2}"#), Ordering::Less);
        assert_eq!(cmp(r#"{"a":1}"#, r#"{"a":2}"#), Ordering::Less);
        assert_eq!(cmp(r#"{"a":1,"b":2}"#, r#"{"b":2,"a":1}"#), Ordering::Equal);
        // Same cardinality, differing key sets: absent key sorts first.
        assert_eq!(cmp(r#"{"a":1}"#, r#"{"b":1}"#), Ordering::Less);
    }

    #[test]
    fn test_unparseable_folds_together() {
        assert_eq!(cmp("{oops", "[oops"), Ordering::Equal);
        assert_eq!(cmp("1", "{oops"), Ordering::Less);
    }

    #[test]
    fn test_scratch_survives_nested_objects() {
        let mut comparer = ValueComparer::new();
        let a = r#"{"x":{"m":1,"n":2},"y":3}"#.as_bytes();
        let b = r#"{"x":{"m":1,"n":2},"y":4}"#.as_bytes();
        assert_eq!(comparer.compare_bytes(a, b), Ordering::Less);
        // Second use of the same instance must still be correct.
        assert_eq!(comparer.compare_bytes(a, a), Ordering::Equal);
    }
}
