//! Canonical JSON encoding
//!
//! Rewrites a JSON value so that structural equality implies byte equality.
//! Canonical encodings are used wherever a value becomes a map key:
//! grouping, set operations, and window partitioning.
//!
//! Canonical form:
//! - object keys sorted ascending, duplicates removed (last occurrence wins)
//! - array element order preserved
//! - numbers rewritten through one formatting path, so `0`, `0.0` and `-0.0`
//!   all encode as `0`
//! - strings, booleans and null keep their literal encodings
//!
//! The canonical encoding of any value never contains a raw newline byte
//! (JSON string escaping guarantees this), so canonical values can be joined
//! with `\n` to form composite keys.

use serde_json::Value;

use super::errors::ValueResult;

/// Canonicalizes one JSON text.
///
/// The input must parse as JSON. The output is byte-identical for any two
/// inputs that are semantically equal under parse/re-serialize equality.
pub fn canonical_json(input: &[u8], out: &mut Vec<u8>) -> ValueResult<()> {
    let parsed: Value = serde_json::from_slice(input)?;
    write_canonical(&parsed, out);
    Ok(())
}

/// Writes the canonical encoding of a parsed JSON value.
///
/// `serde_json`'s default map is ordered by key, so object keys arrive
/// sorted and deduplicated (last duplicate wins at parse time); this
/// function only has to emit them in iteration order.
pub fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_canonical_number(n, out),
        Value::String(s) => write_escaped_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        Value::Object(fields) => {
            out.push(b'{');
            for (i, (key, val)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_escaped_string(key, out);
                out.push(b':');
                write_canonical(val, out);
            }
            out.push(b'}');
        }
    }
}

/// Writes a number through one canonical formatting path.
///
/// Integral values (including negative-zero and float-typed integers in the
/// exactly-representable range) are written in integer form; everything else
/// uses the shortest round-trippable float representation.
fn write_canonical_number(n: &serde_json::Number, out: &mut Vec<u8>) {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
        return;
    }
    if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
        return;
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f == f.trunc() && f.abs() < 9_007_199_254_740_992.0 => {
            out.extend_from_slice((f as i64).to_string().as_bytes());
        }
        Some(f) => {
            out.extend_from_slice(f.to_string().as_bytes());
        }
        // Number always holds one of the three representations; this arm is
        // unreachable for values produced by the serde_json parser.
        None => out.extend_from_slice(b"null"),
    }
}

/// Writes a string with standard JSON escaping.
fn write_escaped_string(s: &str, out: &mut Vec<u8>) {
    // serde_json's string serializer is infallible when writing to a Vec.
    let encoded = serde_json::to_vec(s).unwrap_or_default();
    out.extend_from_slice(&encoded);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(input: &str) -> Vec<u8> {
        let mut out = Vec::new();
        canonical_json(input.as_bytes(), &mut out).unwrap();
        out
    }

    #[test]
    fn test_idempotent() {
        let cases = [
            "null",
            "true",
            "0.0",
            r#""a\nb""#,
            r#"{"b":1,"a":[1,2.5,{"z":null}]}"#,
        ];
        for case in cases {
            let once = canon(case);
            let mut twice = Vec::new();
            canonical_json(&once, &mut twice).unwrap();
            assert_eq!(once, twice, "not idempotent for {case}");
        }
    }

    #[test]
    fn test_numeric_variants_identical() {
        assert_eq!(canon("0"), canon("0.0"));
        assert_eq!(canon("0"), canon("-0.0"));
        assert_eq!(canon("0"), b"0");
        assert_eq!(canon("3000"), canon("3000.0"));
        assert_eq!(canon("1.5"), b"1.5");
    }

    #[test]
    fn test_object_key_order_normalized() {
        assert_eq!(canon(r#"{"b":2,"a":1}"#), canon(r#"{"a":1,"b":2}"#));
        assert_eq!(canon(r#"{"b":2,"a":1}"#), b"{\"a\":1,\"b\":2}");
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        assert_eq!(canon(r#"{"a":1,"a":2}"#), b"{\"a\":2}");
    }

    #[test]
    fn test_no_raw_newline_in_output() {
        let out = canon(r#"{"a\nb":"c\nd"}"#);
        assert!(!out.contains(&b'\n'));
    }

    #[test]
    fn test_array_order_preserved() {
        assert_eq!(canon("[2,1]"), b"[2,1]");
        assert_ne!(canon("[2,1]"), canon("[1,2]"));
    }
}
