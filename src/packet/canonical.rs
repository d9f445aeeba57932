//! Canonical serialization and content hashing (§4.1).
//!
//! Canonicalization rule: deterministic (lexicographic) ordering of map
//! keys, compact form, UTF-8. Two packets with the same logical `content`
//! must hash identically regardless of submission order — this is exercised
//! as a `proptest` property in `tests/`.

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Recursively re-order every object's keys lexicographically, producing a
/// value whose `to_string()` is stable regardless of the original field
/// order. Arrays keep their order — element order is semantically
/// significant (e.g. chunk insertion order, §3).
fn canonicalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize_value(v)))
                .collect();
            let mut out = serde_json::Map::with_capacity(ordered.len());
            for (k, v) in ordered {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_value).collect()),
        other => other.clone(),
    }
}

/// Serialize `content` (or any JSON value) into its canonical compact form.
pub fn canonical_serialize(content: &Value) -> String {
    let canonical = canonicalize_value(content);
    // serde_json's default Value formatting for BTreeMap-backed construction
    // already emits keys in insertion order, which is now lexicographic.
    serde_json::to_string(&canonical).expect("canonicalized JSON values always serialize")
}

/// `SHA256(canonical(content))`, hex-encoded (64 lowercase hex chars).
pub fn content_hash(content: &Value) -> String {
    let canonical = canonical_serialize(content);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reorders_object_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_serialize(&a), canonical_serialize(&b));
    }

    #[test]
    fn preserves_array_order() {
        let a = json!({"items": [1, 2, 3]});
        let b = json!({"items": [3, 2, 1]});
        assert_ne!(canonical_serialize(&a), canonical_serialize(&b));
    }

    #[test]
    fn hash_is_64_hex_chars() {
        let h = content_hash(&json!({"x": 1}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nested_reordering_is_hash_stable() {
        let a = json!({"outer": {"z": 1, "a": {"y": 2, "x": 3}}});
        let b = json!({"outer": {"a": {"x": 3, "y": 2}, "z": 1}});
        assert_eq!(content_hash(&a), content_hash(&b));
    }
}
