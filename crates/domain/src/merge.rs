//! JSON merge patches and leaf-path diffs.
//!
//! Patches follow RFC 7386 semantics: objects merge recursively, a
//! `null` value deletes the key, anything else replaces. Arrays are
//! leaves and replace wholesale.

use serde_json::{Map, Value};

use crate::model::DiffEntry;

/// Fields a state patch may never set directly; the turn protocol owns
/// them.
pub const PROTECTED_FIELDS: [&str; 2] = ["turn", "log_index"];

/// Apply a merge patch to a base document, returning the merged result.
pub fn merge_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, patch_value) in patch_map {
                match patch_value {
                    Value::Null => {
                        merged.remove(key);
                    }
                    Value::Object(_) => {
                        let sub_base = merged.get(key).cloned().unwrap_or(Value::Object(Map::new()));
                        merged.insert(key.clone(), merge_patch(&sub_base, patch_value));
                    }
                    other => {
                        merged.insert(key.clone(), other.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        // A non-object patch replaces the base entirely.
        (_, patch) => patch.clone(),
    }
}

/// Return the protected fields a patch tries to touch, if any.
pub fn protected_violations(patch: &Value) -> Vec<&'static str> {
    let Some(obj) = patch.as_object() else {
        return Vec::new();
    };
    PROTECTED_FIELDS
        .iter()
        .copied()
        .filter(|f| obj.contains_key(*f))
        .collect()
}

/// Enumerate leaf-path changes between two documents.
///
/// Paths are dot-joined (`flags.met_hermit`); arrays are compared as
/// leaves. Renderings: `→new` for additions, `old→new` for changes,
/// `removed` for deletions.
pub fn diff(old: &Value, new: &Value) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    diff_inner(old, new, String::new(), &mut entries);
    entries
}

fn diff_inner(old: &Value, new: &Value, path: String, out: &mut Vec<DiffEntry>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = join(&path, key);
                match new_map.get(key) {
                    Some(new_value) => diff_inner(old_value, new_value, child, out),
                    None => out.push(DiffEntry {
                        path: child,
                        changes: "removed".into(),
                    }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    out.push(DiffEntry {
                        path: join(&path, key),
                        changes: format!("→{}", render(new_value)),
                    });
                }
            }
        }
        _ if old == new => {}
        _ => out.push(DiffEntry {
            path,
            changes: format!("{}→{}", render(old), render(new)),
        }),
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_owned()
    } else {
        format!("{path}.{key}")
    }
}

/// Human rendering of a leaf value: strings bare, everything else JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
