//! Canonical JSON serialization for signed documents.
//!
//! Signatures cover the canonical byte form of a document, so every node
//! must produce the identical serialization for the same value:
//!
//! 1. Object keys sorted lexicographically (UTF-8 byte order), at every
//!    nesting level.
//! 2. Compact output, no whitespace.
//! 3. Null values are kept: a signed document nulls its signature fields
//!    rather than omitting them, and both sides must hash the same bytes.

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Serialize `value` to its canonical JSON string.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&sort_keys(json))?)
}

/// Canonical JSON as bytes, the form signatures are computed over.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(to_canonical_json(value)?.into_bytes())
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
