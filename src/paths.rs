//! Field-path addressing over nested page documents.
//!
//! Translatable content lives in arbitrarily nested maps and arrays, and
//! incremental diffing needs a stable address for every leaf. Paths use
//! dots for object keys and brackets for array indices
//! (`features.items[2].title`). A single tokenizer backs `flatten`,
//! `get_by_path`, `set_by_path` and `delete_by_path` so the four can never
//! disagree on parsing edge cases.

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Suffix of the synthetic per-array entry recording its length.
///
/// Flattening records `<array path>.__length` for every array so that a
/// shrunken array is detectable even when the surviving elements are
/// unchanged.
pub const LENGTH_MARKER: &str = "__length";

/// One segment of a parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seg {
    /// Object key (`meta`, `title`, ...)
    Key(String),
    /// Array index (`[2]`)
    Index(usize),
}

/// Parse a dotted/indexed path into segments.
///
/// Accepts `a.b`, `a[0]`, `a[0].b`, `a.b[1][2]`. Rejects empty paths,
/// empty segments, unterminated brackets and non-numeric indices.
pub fn parse_path(path: &str) -> Result<Vec<Seg>> {
    if path.is_empty() {
        bail!("Empty field path");
    }

    let mut segs = Vec::new();
    let mut rest = path;

    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            let end = match stripped.find(']') {
                Some(i) => i,
                None => bail!("Unterminated '[' in path '{}'", path),
            };
            let idx: usize = stripped[..end]
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid array index in path '{}'", path))?;
            segs.push(Seg::Index(idx));
            rest = &stripped[end + 1..];
            if let Some(after_dot) = rest.strip_prefix('.') {
                if after_dot.is_empty() {
                    bail!("Trailing '.' in path '{}'", path);
                }
                rest = after_dot;
            }
        } else {
            let key_end = rest.find(|c| c == '.' || c == '[').unwrap_or(rest.len());
            if key_end == 0 {
                bail!("Empty segment in path '{}'", path);
            }
            segs.push(Seg::Key(rest[..key_end].to_string()));
            rest = &rest[key_end..];
            if let Some(after_dot) = rest.strip_prefix('.') {
                if after_dot.is_empty() {
                    bail!("Trailing '.' in path '{}'", path);
                }
                rest = after_dot;
            }
        }
    }

    Ok(segs)
}

/// The terminal key of a path, used to match against the skip list.
///
/// For `how_to.steps[2].image` this is `image`; a trailing array index
/// falls back to the owning key (`faq[0]` -> `faq`).
pub fn terminal_key(path: &str) -> Option<String> {
    let segs = parse_path(path).ok()?;
    segs.iter().rev().find_map(|s| match s {
        Seg::Key(k) => Some(k.clone()),
        Seg::Index(_) => None,
    })
}

/// Whether a flattened path is a synthetic array-length marker.
pub fn is_length_marker(path: &str) -> bool {
    path == LENGTH_MARKER || path.ends_with(&format!(".{}", LENGTH_MARKER))
}

/// The array path a length marker describes (`items.__length` -> `items`).
pub fn length_marker_target(path: &str) -> Option<&str> {
    if !is_length_marker(path) {
        return None;
    }
    path.strip_suffix(LENGTH_MARKER)
        .map(|p| p.strip_suffix('.').unwrap_or(p))
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                flatten_into(v, &join_key(prefix, key), out);
            }
        }
        Value::Array(items) => {
            out.insert(
                join_key(prefix, LENGTH_MARKER),
                Value::from(items.len() as u64),
            );
            for (i, item) in items.iter().enumerate() {
                flatten_into(item, &format!("{}[{}]", prefix, i), out);
            }
        }
        Value::Null => {}
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Flatten a document into `path -> leaf value`, with a synthetic
/// `__length` entry per array. Null and scalar input yield an empty map.
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    if value.is_object() || value.is_array() {
        flatten_into(value, "", &mut out);
    }
    out
}

/// Look up a value by path. Missing intermediate structure yields `None`.
pub fn get_by_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let segs = parse_path(path).ok()?;
    let mut cur = doc;
    for seg in &segs {
        cur = match seg {
            Seg::Key(k) => cur.as_object()?.get(k)?,
            Seg::Index(i) => cur.as_array()?.get(*i)?,
        };
    }
    Some(cur)
}

/// Set a value by path, creating intermediate objects or arrays as needed.
///
/// Whether a missing intermediate becomes an object or an array is decided
/// by the *next* segment's kind. Setting past the end of an array pads it
/// with nulls.
pub fn set_by_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let segs = parse_path(path)?;
    let mut cur = doc;

    for (i, seg) in segs.iter().enumerate() {
        let last = i == segs.len() - 1;
        match seg {
            Seg::Key(k) => {
                if !cur.is_object() {
                    *cur = Value::Object(serde_json::Map::new());
                }
                let map = cur.as_object_mut().expect("just ensured object");
                if last {
                    map.insert(k.clone(), value);
                    return Ok(());
                }
                let slot = map.entry(k.clone()).or_insert(Value::Null);
                if slot.is_null() {
                    *slot = empty_for(&segs[i + 1]);
                }
                cur = slot;
            }
            Seg::Index(idx) => {
                if !cur.is_array() {
                    *cur = Value::Array(Vec::new());
                }
                let arr = cur.as_array_mut().expect("just ensured array");
                while arr.len() <= *idx {
                    arr.push(Value::Null);
                }
                if last {
                    arr[*idx] = value;
                    return Ok(());
                }
                if arr[*idx].is_null() {
                    arr[*idx] = empty_for(&segs[i + 1]);
                }
                cur = &mut arr[*idx];
            }
        }
    }

    Ok(())
}

fn empty_for(next: &Seg) -> Value {
    match next {
        Seg::Key(_) => Value::Object(serde_json::Map::new()),
        Seg::Index(_) => Value::Array(Vec::new()),
    }
}

/// Delete a value by path: removes the object key or splices the array
/// index. Missing paths are a silent no-op.
pub fn delete_by_path(doc: &mut Value, path: &str) -> Result<()> {
    let segs = parse_path(path)?;
    let (last, parents) = match segs.split_last() {
        Some(pair) => pair,
        None => return Ok(()),
    };

    let mut cur = doc;
    for seg in parents {
        let next = match seg {
            Seg::Key(k) => cur.as_object_mut().and_then(|m| m.get_mut(k)),
            Seg::Index(i) => cur.as_array_mut().and_then(|a| a.get_mut(*i)),
        };
        match next {
            Some(v) => cur = v,
            None => return Ok(()),
        }
    }

    match last {
        Seg::Key(k) => {
            if let Some(map) = cur.as_object_mut() {
                map.remove(k);
            }
        }
        Seg::Index(i) => {
            if let Some(arr) = cur.as_array_mut() {
                if *i < arr.len() {
                    arr.remove(*i);
                }
            }
        }
    }

    Ok(())
}

/// Make `target` structurally congruent with `reference`: arrays are
/// trimmed to the reference length and object keys absent from the
/// reference are removed, recursively. Values are never copied — only
/// structure is synced, so translated text survives.
pub fn sync_structure(reference: &Value, target: &mut Value) {
    match (reference, target) {
        (Value::Object(ref_map), Value::Object(tgt_map)) => {
            tgt_map.retain(|k, _| ref_map.contains_key(k));
            for (k, tgt_v) in tgt_map.iter_mut() {
                if let Some(ref_v) = ref_map.get(k) {
                    sync_structure(ref_v, tgt_v);
                }
            }
        }
        (Value::Array(ref_arr), Value::Array(tgt_arr)) => {
            tgt_arr.truncate(ref_arr.len());
            for (i, tgt_v) in tgt_arr.iter_mut().enumerate() {
                sync_structure(&ref_arr[i], tgt_v);
            }
        }
        _ => {}
    }
}
