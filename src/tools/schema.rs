//! Parameter schema sanitization.
//!
//! Model-facing function declarations accept only a subset of JSON Schema.
//! [`sanitize_parameters`] strips the unsupported fields recursively so any
//! tool schema (hand-written or discovered from an MCP server) can be
//! forwarded safely.

use serde_json::Value;

/// Fields the model-facing schema format does not accept.
const UNSUPPORTED_FIELDS: &[&str] = &[
    "default",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "uniqueItems",
    "additionalProperties",
    "$schema",
    "$ref",
    "$defs",
];

/// `format` values that survive sanitization on string schemas.
const SUPPORTED_FORMATS: &[&str] = &["enum", "date-time"];

/// Nesting depth guard. JSON values are trees, so true cycles cannot occur,
/// but adversarial schemas can still nest absurdly deep.
const MAX_DEPTH: usize = 64;

/// Produce a sanitized copy of a parameter schema.
///
/// Removes unsupported fields, drops unsupported `format` values on string
/// schemas, and recurses through `properties`, `items`, `anyOf`, `oneOf`
/// and `allOf`. Sanitizing an already-sanitized schema is a no-op.
pub fn sanitize_parameters(schema: &Value) -> Value {
    let mut cleaned = schema.clone();
    sanitize_in_place(&mut cleaned, 0);
    cleaned
}

fn sanitize_in_place(schema: &mut Value, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }

    let Some(object) = schema.as_object_mut() else {
        return;
    };

    for field in UNSUPPORTED_FIELDS {
        object.remove(*field);
    }

    let is_string_type = object.get("type").and_then(Value::as_str) == Some("string");
    if is_string_type {
        let keep = object
            .get("format")
            .and_then(Value::as_str)
            .map(|format| SUPPORTED_FORMATS.contains(&format))
            .unwrap_or(true);
        if !keep {
            object.remove("format");
        }
    }

    if let Some(properties) = object.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, property) in properties.iter_mut() {
            sanitize_in_place(property, depth + 1);
        }
    }

    if let Some(items) = object.get_mut("items") {
        sanitize_in_place(items, depth + 1);
    }

    for combinator in ["anyOf", "oneOf", "allOf"] {
        if let Some(variants) = object.get_mut(combinator).and_then(Value::as_array_mut) {
            for variant in variants.iter_mut() {
                sanitize_in_place(variant, depth + 1);
            }
        }
    }
}
