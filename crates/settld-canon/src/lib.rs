// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Deterministic canonical JSON encoding and SHA-256 content hashing.
//!
//! `canonical(x)` yields a byte string that depends only on the abstract
//! value of `x`: object keys sorted by code point, numbers restricted to
//! finite safe integers, arrays order-preserving. `serde_json::Value`'s
//! default `Object` representation is already a `BTreeMap`, so key
//! ordering falls out of serialization for free — [`normalize`] only has
//! to validate numbers and reject duplicate keys in the source text.

use serde::Serialize;
use serde_json::{Map, Value};
use settld_error::{ErrorCode, SettldError};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const SAFE_INTEGER_MAX: i64 = (1i64 << 53) - 1;
const SAFE_INTEGER_MIN: i64 = -((1i64 << 53) - 1);

fn schema_error(message: impl Into<String>) -> SettldError {
    SettldError::new(ErrorCode::SchemaInvalid, message)
}

fn number_error(message: impl Into<String>) -> SettldError {
    SettldError::new(ErrorCode::CanonicalNumberInvalid, message)
}

/// Recursively validate a value against the canonical number rule and
/// reject disallowed shapes (non-finite floats, integers outside the
/// safe-integer range). Structural key sorting is free: `Value::Object`
/// is `BTreeMap`-backed.
pub fn normalize(value: &Value) -> Result<Value, SettldError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if !(SAFE_INTEGER_MIN..=SAFE_INTEGER_MAX).contains(&i) {
                    return Err(number_error(format!(
                        "integer {i} is outside the safe-integer range"
                    )));
                }
                Ok(value.clone())
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(number_error("number is not finite"));
                }
                if f.fract() != 0.0 {
                    return Err(number_error(
                        "non-integer numbers are not permitted in canonical form",
                    ));
                }
                if f.abs() > SAFE_INTEGER_MAX as f64 {
                    return Err(number_error(format!(
                        "number {f} is outside the safe-integer range"
                    )));
                }
                Ok(value.clone())
            } else {
                Err(number_error("number could not be classified"))
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(normalize(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize(v)?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Parse JSON text strictly: structurally valid per `serde_json`, and
/// free of duplicate object keys (which `serde_json::Value` would
/// otherwise silently resolve to "last key wins").
pub fn parse_strict(text: &str) -> Result<Value, SettldError> {
    reject_duplicate_keys(text)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| schema_error(format!("invalid JSON: {e}")))?;
    normalize(&value)
}

/// Render a value in canonical form and return the UTF-8 bytes.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, SettldError> {
    let normalized = normalize(value)?;
    serde_json::to_vec(&normalized).map_err(|e| schema_error(format!("serialization failed: {e}")))
}

/// Render a value in canonical form as a `String`.
pub fn canonical_string(value: &Value) -> Result<String, SettldError> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| schema_error(format!("canonical form was not utf-8: {e}")))
}

/// Canonicalize a `Serialize` value directly, without going through a
/// caller-constructed `Value` first.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, SettldError> {
    let v = serde_json::to_value(value).map_err(|e| schema_error(format!("serialization failed: {e}")))?;
    canonical_string(&v)
}

/// `sha256Hex`: lowercase hex SHA-256 of arbitrary bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of a value's canonical form.
pub fn sha256_hex_of_canonical(value: &Value) -> Result<String, SettldError> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// Return a clone of `value` with the given top-level object keys
/// removed entirely (not set to null) — the "hashed core" pattern used
/// by artifact and event hashing, where the hash/signature field is
/// absent from what gets hashed rather than nulled out.
#[must_use]
pub fn excluding_fields(value: &Value, fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                if !fields.contains(&k.as_str()) {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Compute the SHA-256 hash of `value` with the given top-level fields
/// excluded from the hashed core. Used for `artifactHash`, `chainHash`,
/// `manifestHash`, `policyHash`, and similarly self-referential fields.
pub fn hash_excluding(value: &Value, fields: &[&str]) -> Result<String, SettldError> {
    sha256_hex_of_canonical(&excluding_fields(value, fields))
}

/// Scan raw JSON text for duplicate keys within the same object. A
/// minimal hand-rolled scanner: `serde_json::Value`'s `BTreeMap`-backed
/// object silently keeps the last of two duplicate keys, losing the
/// information needed to reject the document, so this runs once over
/// the source text before any `Value` is built.
fn reject_duplicate_keys(text: &str) -> Result<(), SettldError> {
    let mut stack: Vec<HashSet<String>> = Vec::new();
    let mut chars = text.char_indices().peekable();
    let mut in_string = false;
    let mut escape = false;
    let mut current_string = String::new();
    let mut expecting_key = false;
    let mut last_string_was_key_candidate: Option<String> = None;

    while let Some((_, c)) = chars.next() {
        if in_string {
            if escape {
                escape = false;
                current_string.push(c);
                continue;
            }
            match c {
                '\\' => escape = true,
                '"' => {
                    in_string = false;
                    last_string_was_key_candidate = Some(std::mem::take(&mut current_string));
                }
                _ => current_string.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                current_string.clear();
            }
            '{' => {
                stack.push(HashSet::new());
                expecting_key = true;
            }
            '}' => {
                stack.pop();
            }
            '[' => expecting_key = false,
            ':' => {
                if expecting_key {
                    if let (Some(key), Some(frame)) =
                        (last_string_was_key_candidate.take(), stack.last_mut())
                    {
                        if !frame.insert(key.clone()) {
                            return Err(schema_error(format!("duplicate key \"{key}\" in object")));
                        }
                    }
                    expecting_key = false;
                }
            }
            ',' => {
                if stack.last().is_some() {
                    expecting_key = true;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
