//! Canonical JSON encoding for deterministic hashing.
//!
//! Documents are normalized with these rules:
//! - Object keys sorted lexicographically (by UTF-8 bytes)
//! - Object members whose value is `null` are dropped
//! - Array elements keep their order and position, `null` elements included
//! - A number whose value equals its own truncation is written as an integer
//!   literal (`10.0` becomes `10`); any other number keeps full precision,
//!   written as the shortest literal that parses back to the same `f64`, with
//!   no `+` in the exponent (`1e300`, `1.5e-7`)
//! - Strings and booleans pass through; no whitespace is inserted
//!
//! The null-dropping rule applies to object members only. Arrays are
//! positional, so removing a `null` element would shift its neighbours.
//!
//! **CRITICAL**: This encoding is FROZEN. Changing it changes every content
//! hash computed from structured payloads, and therefore every chain value.

use serde::Serialize;
use serde_json::{Number, Value};

use crate::error::{CoreError, Result};

/// 2^63 as f64: the first value past `i64::MAX`.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// 2^64 as f64: the first value past `u64::MAX`.
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

/// Parse JSON bytes and return their canonical encoding.
///
/// Fails with [`CoreError::Parse`] when the input is not valid JSON.
pub fn canonicalize(input: &[u8]) -> Result<Vec<u8>> {
    let value: Value =
        serde_json::from_slice(input).map_err(|e| CoreError::Parse(e.to_string()))?;
    canonicalize_value(&value)
}

/// Canonical encoding of an already-parsed JSON value.
pub fn canonicalize_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_value(&mut buf, value)?;
    Ok(buf)
}

/// Canonical encoding of any serializable value.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| CoreError::Encoding(e.to_string()))?;
    canonicalize_value(&value)
}

/// Recursively encode a JSON value.
fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Number(n) => encode_number(buf, n)?,
        Value::String(s) => encode_string(buf, s)?,
        Value::Array(items) => {
            buf.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                encode_value(buf, item)?;
            }
            buf.push(b']');
        }
        Value::Object(map) => {
            // Sort explicitly: serde_json's map order depends on crate features.
            let mut members: Vec<(&String, &Value)> =
                map.iter().filter(|(_, v)| !v.is_null()).collect();
            members.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            buf.push(b'{');
            for (i, (key, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                encode_string(buf, key)?;
                buf.push(b':');
                encode_value(buf, member)?;
            }
            buf.push(b'}');
        }
    }
    Ok(())
}

/// Encode a number, collapsing integral floats to integer literals.
fn encode_number(buf: &mut Vec<u8>, n: &Number) -> Result<()> {
    if let Some(i) = n.as_i64() {
        buf.extend_from_slice(i.to_string().as_bytes());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        buf.extend_from_slice(u.to_string().as_bytes());
        return Ok(());
    }

    let f = n
        .as_f64()
        .ok_or_else(|| CoreError::Encoding(format!("unrepresentable number {}", n)))?;

    if f.is_finite() && f == f.trunc() {
        if (-I64_BOUND..I64_BOUND).contains(&f) {
            buf.extend_from_slice((f as i64).to_string().as_bytes());
            return Ok(());
        }
        if (0.0..U64_BOUND).contains(&f) {
            buf.extend_from_slice((f as u64).to_string().as_bytes());
            return Ok(());
        }
    }

    // Parsing is exact (float_roundtrip), so this is the shortest literal
    // for the parsed value.
    let literal = serde_json::to_string(n).map_err(|e| CoreError::Encoding(e.to_string()))?;
    buf.extend_from_slice(literal.replacen("e+", "e", 1).as_bytes());
    Ok(())
}

/// Encode a string with JSON escaping.
fn encode_string(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    serde_json::to_writer(&mut *buf, s).map_err(|e| CoreError::Encoding(e.to_string()))
}
