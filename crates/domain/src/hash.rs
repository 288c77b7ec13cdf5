//! Stable state hashing for optimistic concurrency.
//!
//! The hash must be identical for semantically identical states no
//! matter which backend loaded them or what key order the source JSON
//! used. `serde_json::Map` is a BTreeMap, so serializing through
//! `Value` yields key-sorted output with a fixed numeric rendering;
//! SHA-256 of that string is the base hash previews are pinned to.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::SessionState;

/// Hash a session state document.
pub fn stable_hash(state: &SessionState) -> Result<String> {
    let value = serde_json::to_value(state)?;
    Ok(stable_hash_value(&value))
}

/// Hash any JSON value with the same canonicalization rules.
pub fn stable_hash_value(value: &Value) -> String {
    let canonical = value.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        assert_eq!(stable_hash_value(&a), stable_hash_value(&b));
    }

    #[test]
    fn different_content_differs() {
        let a: Value = serde_json::from_str(r#"{"hp": 10}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"hp": 11}"#).unwrap();
        assert_ne!(stable_hash_value(&a), stable_hash_value(&b));
    }

    #[test]
    fn state_hash_sees_log_index() {
        let mut state = SessionState::starter();
        let before = stable_hash(&state).unwrap();
        state.log_index += 1;
        let after = stable_hash(&state).unwrap();
        assert_ne!(before, after);
    }
}
