//! Structural validation of JSON documents against JSON-Schema-shaped
//! descriptors.
//!
//! Validation is pluggable: callers hand any schema `Value` alongside
//! the document. Checks cover `type`, `required`, `properties`,
//! `items`, `enum`, and `minimum`, which is enough to guard the
//! engine's invariants without a full JSON Schema engine.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::model::DocKind;

/// Validate `doc` against `schema`, failing with `SchemaViolation` on
/// the first mismatch.
pub fn validate(doc: &Value, schema: &Value) -> Result<()> {
    let mut path = String::from("$");
    check(doc, schema, &mut path)
}

fn check(doc: &Value, schema: &Value, path: &mut String) -> Result<()> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(Value::String(ty)) = schema_obj.get("type") {
        if !type_matches(doc, ty) {
            return Err(violation(path, format!("expected {ty}, got {}", type_name(doc))));
        }
    }

    if let Some(Value::Array(allowed)) = schema_obj.get("enum") {
        if !allowed.contains(doc) {
            return Err(violation(path, format!("value {doc} not in enum")));
        }
    }

    if let Some(minimum) = schema_obj.get("minimum").and_then(Value::as_i64) {
        if let Some(n) = doc.as_i64() {
            if n < minimum {
                return Err(violation(path, format!("{n} below minimum {minimum}")));
            }
        }
    }

    if let (Some(doc_obj), Some(Value::Array(required))) =
        (doc.as_object(), schema_obj.get("required"))
    {
        for field in required {
            if let Some(name) = field.as_str() {
                if !doc_obj.contains_key(name) {
                    return Err(violation(path, format!("missing required field {name}")));
                }
            }
        }
    }

    if let (Some(doc_obj), Some(Value::Object(properties))) =
        (doc.as_object(), schema_obj.get("properties"))
    {
        for (name, prop_schema) in properties {
            if let Some(value) = doc_obj.get(name) {
                let len = path.len();
                path.push('.');
                path.push_str(name);
                check(value, prop_schema, path)?;
                path.truncate(len);
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (doc.as_array(), schema_obj.get("items")) {
        for (i, item) in items.iter().enumerate() {
            let len = path.len();
            path.push_str(&format!("[{i}]"));
            check(item, item_schema, path)?;
            path.truncate(len);
        }
    }

    Ok(())
}

fn violation(path: &str, detail: String) -> Error {
    Error::SchemaViolation(format!("{path}: {detail}"))
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in schemas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Schema guarding the typed root of `SessionState`. Open-ended extra
/// fields pass through untouched.
pub fn state_schema() -> Value {
    json!({
        "type": "object",
        "required": ["turn", "log_index"],
        "properties": {
            "turn": {"type": "integer", "minimum": 0},
            "log_index": {"type": "integer", "minimum": 0},
            "hp": {"type": "integer"},
            "max_hp": {"type": "integer"},
            "ac": {"type": "integer"},
            "location": {"type": "string"},
            "conditions": {"type": "array", "items": {"type": "string"}},
            "inventory": {"type": "array", "items": {"type": "string"}},
            "scene_id": {"type": "string"},
            "flags": {"type": "object"},
            "gold": {"type": "integer"},
            "spells": {"type": "array", "items": {"type": "string"}}
        }
    })
}

/// Per-kind schemas for the auxiliary documents. All are shallow:
/// aux docs are whole-document replaces of small JSON blobs.
pub fn doc_schema(kind: DocKind) -> Value {
    match kind {
        DocKind::Mood => json!({
            "type": "object",
            "properties": {
                "tone": {"type": "string"},
                "tension": {"type": "integer", "minimum": 0},
                "notes": {"type": "string"}
            }
        }),
        DocKind::Discoveries => json!({
            "type": "object",
            "required": ["items"],
            "properties": {
                "items": {"type": "array", "items": {"type": "object"}}
            }
        }),
        DocKind::NpcMemory | DocKind::NpcRelations => json!({
            "type": "object"
        }),
        DocKind::LastDiscovery => json!({
            "type": "object",
            "required": ["turn"],
            "properties": {
                "turn": {"type": "integer", "minimum": 0}
            }
        }),
        DocKind::AutosaveMeta => json!({
            "type": "object",
            "required": ["save_id", "turn"],
            "properties": {
                "save_id": {"type": "string"},
                "turn": {"type": "integer", "minimum": 0}
            }
        }),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
