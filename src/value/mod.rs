//! Row and value model
//!
//! A value (`Val`) is one JSON-encoded byte string; the empty slice is
//! `missing`. A row is an ordered sequence of values, positionally aligned
//! with the owning operator's labels. Rows flow through the engine borrowed
//! (`&[&[u8]]`) and are only valid for the duration of one sink call;
//! consumers that retain rows own a deep copy.
//!
//! Row framing is little-endian length-prefixed:
//!
//! ```text
//! +-----------+--------+---------+--------+---------+
//! | count u64 | len u64| bytes   | len u64| bytes   | ...
//! +-----------+--------+---------+--------+---------+
//! ```
//!
//! `encode_row_canonical` applies the canonical-JSON transform per value so
//! that structurally equal rows produce byte-identical encodings, which makes
//! the framed form usable as a map key. Decoding is the structural inverse of
//! both forms.

pub mod canonical;
pub mod compare;
pub mod errors;

pub use canonical::canonical_json;
pub use compare::ValueComparer;
pub use errors::{ValueError, ValueResult};

/// The `missing` value: the empty byte string.
pub const MISSING: &[u8] = b"";
/// Literal encoding of JSON null.
pub const NULL: &[u8] = b"null";
/// Literal encoding of JSON true.
pub const TRUE: &[u8] = b"true";
/// Literal encoding of JSON false.
pub const FALSE: &[u8] = b"false";

/// Ordered names describing each positional slot of a row.
pub type Labels = Vec<String>;

/// Appends the framed encoding of a row.
pub fn encode_row(row: &[&[u8]], out: &mut Vec<u8>) {
    out.extend_from_slice(&(row.len() as u64).to_le_bytes());
    for val in row {
        out.extend_from_slice(&(val.len() as u64).to_le_bytes());
        out.extend_from_slice(val);
    }
}

/// Appends the framed encoding of a row, canonicalizing each value.
///
/// `missing` values are carried through as empty; all other values must be
/// valid JSON.
pub fn encode_row_canonical(row: &[&[u8]], out: &mut Vec<u8>) -> ValueResult<()> {
    out.extend_from_slice(&(row.len() as u64).to_le_bytes());
    let mut scratch = Vec::new();
    for val in row {
        scratch.clear();
        if !val.is_empty() {
            canonical_json(val, &mut scratch)?;
        }
        out.extend_from_slice(&(scratch.len() as u64).to_le_bytes());
        out.extend_from_slice(&scratch);
    }
    Ok(())
}

/// Decodes one framed row, borrowing the values from `buf`.
///
/// Returns the number of bytes consumed, so callers can decode records that
/// carry a row followed by further payload.
pub fn decode_row<'a>(buf: &'a [u8], out: &mut Vec<&'a [u8]>) -> ValueResult<usize> {
    out.clear();
    let mut at = 0usize;
    let count = read_u64(buf, &mut at)? as usize;
    for _ in 0..count {
        let len = read_u64(buf, &mut at)? as usize;
        let end = at.checked_add(len).ok_or(ValueError::Truncated(at))?;
        if end > buf.len() {
            return Err(ValueError::Truncated(at));
        }
        out.push(&buf[at..end]);
        at = end;
    }
    Ok(at)
}

/// Appends a (row, projected) pair as two consecutive framed rows.
pub fn encode_row_pair(row: &[&[u8]], projected: &[&[u8]], out: &mut Vec<u8>) {
    encode_row(row, out);
    encode_row(projected, out);
}

/// Decodes the row half of a pair encoding. Returns bytes consumed.
pub fn decode_pair_row<'a>(buf: &'a [u8], out: &mut Vec<&'a [u8]>) -> ValueResult<usize> {
    decode_row(buf, out)
}

/// Decodes the projected half of a pair encoding.
pub fn decode_pair_projected<'a>(buf: &'a [u8], out: &mut Vec<&'a [u8]>) -> ValueResult<()> {
    let mut skipped = Vec::new();
    let consumed = decode_row(buf, &mut skipped)?;
    decode_row(&buf[consumed..], out)?;
    Ok(())
}

/// Appends a composite key: each value canonicalized, joined with `\n`.
///
/// Canonical encodings contain no raw newline, so the join is unambiguous;
/// `missing` components encode as empty.
pub fn encode_composite_key(vals: &[&[u8]], out: &mut Vec<u8>) -> ValueResult<()> {
    for (i, val) in vals.iter().enumerate() {
        if i > 0 {
            out.push(b'\n');
        }
        if !val.is_empty() {
            canonical_json(val, out)?;
        }
    }
    Ok(())
}

/// Splits a composite key back into its canonical components.
pub fn split_composite_key(key: &[u8]) -> Vec<&[u8]> {
    key.split(|b| *b == b'\n').collect()
}

/// Deep-copies a borrowed row into owned storage.
pub fn copy_row(row: &[&[u8]]) -> Vec<Vec<u8>> {
    row.iter().map(|v| v.to_vec()).collect()
}

/// Borrows an owned row as the slice-of-slices form sinks accept.
pub fn row_refs(row: &[Vec<u8>]) -> Vec<&[u8]> {
    row.iter().map(|v| v.as_slice()).collect()
}

fn read_u64(buf: &[u8], at: &mut usize) -> ValueResult<u64> {
    let end = at.checked_add(8).ok_or(ValueError::Truncated(*at))?;
    if end > buf.len() {
        return Err(ValueError::Truncated(*at));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[*at..end]);
    *at = end;
    Ok(u64::from_le_bytes(raw))
}
