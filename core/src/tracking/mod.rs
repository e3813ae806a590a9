//! Change-tracking primitives.
//!
//! Two granularities are supported by the editable repositories:
//! whole-record content hashing (this module) and per-field divergence
//! sets (maintained by the repositories themselves against the
//! [`crate::model::Trackable`] descriptor). The notifier delivers
//! dirty-state transitions to registered observers.

pub mod notify;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{DataError, DataResult};

pub use notify::{ChangeNotifier, ObserverId};

/// SHA-256 digest of a record's canonical form.
///
/// Collision resistance at practical record sizes is all that is
/// required; the hash is never used for security.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hex rendering, handy in logs and tests.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Hash a serializable value deterministically.
///
/// The value is rendered to a JSON tree first and written back with
/// all object keys sorted, so map iteration order never leaks into the
/// digest: two equal records always hash equal.
pub fn content_hash<T: Serialize>(value: &T) -> DataResult<ContentHash> {
    let tree = serde_json::to_value(value)
        .map_err(|e| DataError::from_json("<content-hash>", e))?;

    let mut hasher = Sha256::new();
    write_canonical(&tree, &mut hasher);
    Ok(ContentHash(hasher.finalize().into()))
}

fn write_canonical(value: &serde_json::Value, hasher: &mut Sha256) {
    use serde_json::Value;

    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(b) => hasher.update(if *b { b"t" } else { b"f" }),
        Value::Number(n) => {
            hasher.update(b"#");
            hasher.update(n.to_string().as_bytes());
        }
        Value::String(s) => {
            hasher.update(b"s");
            hasher.update(s.len().to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(items.len().to_le_bytes());
            for item in items {
                write_canonical(item, hasher);
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            hasher.update(keys.len().to_le_bytes());
            for key in keys {
                hasher.update(key.len().to_le_bytes());
                hasher.update(key.as_bytes());
                write_canonical(&map[key], hasher);
            }
        }
    }
}
