//! Canonicalization and content hashing of raw records
//!
//! Volatile fields are stripped at every depth before hashing, and object
//! keys are always written in sorted order so that the hash depends only
//! on content.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields that change on every fetch without any substantive change
pub const VOLATILE_FIELDS: &[&str] = &["timestamp", "lastHeartbeatTime", "resourceVersion"];

/// Return a copy of `value` with every key in `exclude` removed at any depth
pub fn canonicalize<S: AsRef<str>>(value: &Value, exclude: &[S]) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(key, _)| !is_excluded(key, exclude))
                .map(|(key, v)| (key.clone(), canonicalize(v, exclude)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| canonicalize(v, exclude)).collect()),
        other => other.clone(),
    }
}

/// Hex SHA-256 digest of the canonical form of `value`
pub fn content_hash<S: AsRef<str>>(value: &Value, exclude: &[S]) -> String {
    let mut hasher = Sha256::new();
    feed(&mut hasher, value, exclude);
    hex::encode(hasher.finalize())
}

fn is_excluded<S: AsRef<str>>(key: &str, exclude: &[S]) -> bool {
    exclude.iter().any(|e| e.as_ref() == key)
}

fn feed<S: AsRef<str>>(hasher: &mut Sha256, value: &Value, exclude: &[S]) {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().filter(|k| !is_excluded(k, exclude)).collect();
            keys.sort();

            hasher.update(b"{");
            for key in keys {
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                feed(hasher, &obj[key.as_str()], exclude);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                feed(hasher, item, exclude);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}
