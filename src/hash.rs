//! Content hashing for change detection.
//!
//! Digests are truncated sha256 (8 hex chars) over a value's canonical
//! string form. This is change detection with human review behind it, not
//! a security boundary; collisions at this length are an accepted
//! tradeoff.

use crate::paths::{flatten, is_length_marker};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Digest length in hex characters.
const DIGEST_LEN: usize = 8;

/// Hash a single value over its canonical string form: strings hash their
/// raw content, objects and arrays their JSON serialization, other scalars
/// their display form.
pub fn hash_value(value: &Value) -> String {
    let canonical = match value {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
        other => other.to_string(),
    };
    let digest = Sha256::digest(canonical.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..DIGEST_LEN].to_string()
}

/// Whole-document digest over `{meta, pageContent}` for cheap
/// "anything changed" checks.
pub fn content_hash(meta: &Value, page_content: &Value) -> String {
    let combined = serde_json::json!({ "meta": meta, "pageContent": page_content });
    hash_value(&combined)
}

/// Per-field digest map over the flattened document.
///
/// Empty strings and nulls are skipped. Synthetic `__length` markers are
/// stored as plain decimal strings so array shrinkage can be compared
/// numerically rather than by digest.
pub fn field_hashes(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (path, v) in flatten(value) {
        if is_length_marker(&path) {
            if let Some(len) = v.as_u64() {
                out.insert(path, len.to_string());
            }
            continue;
        }
        match &v {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            _ => {
                out.insert(path, hash_value(&v));
            }
        }
    }
    out
}
