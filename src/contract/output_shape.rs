use std::collections::BTreeSet;

use serde_json::Value;

/// Top-level shape of a tool's declared output, as far as field references
/// can be checked against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    String,
    Object,
    Array,
}

impl OutputShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputShape::String => "string",
            OutputShape::Object => "object",
            OutputShape::Array => "array",
        }
    }
}

/// Extract the output shape and the set of referenceable field names from an
/// output schema.
///
/// Returns `(shape, fields)`:
/// - `(None, None)` when the schema is generic and nothing can be checked;
/// - `(Some(String), Some(∅))` for string outputs, which have no fields;
/// - `(Some(Object), Some(fields))` for objects with declared properties;
/// - `(Some(Array), Some(fields))` for arrays of objects with declared item
///   properties, `(Some(Array), None)` for other arrays.
pub fn resolve_output_fields(schema: &Value) -> (Option<OutputShape>, Option<BTreeSet<String>>) {
    let Some(schema_type) = schema.get("type").and_then(Value::as_str) else {
        return (None, None);
    };

    match schema_type {
        "string" => (Some(OutputShape::String), Some(BTreeSet::new())),
        "object" => match schema.get("properties").and_then(Value::as_object) {
            Some(props) if !props.is_empty() => (
                Some(OutputShape::Object),
                Some(props.keys().cloned().collect()),
            ),
            _ => (None, None),
        },
        "array" => {
            let item_props = schema
                .get("items")
                .filter(|items| items.get("type").and_then(Value::as_str) == Some("object"))
                .and_then(|items| items.get("properties"))
                .and_then(Value::as_object);
            match item_props {
                Some(props) if !props.is_empty() => (
                    Some(OutputShape::Array),
                    Some(props.keys().cloned().collect()),
                ),
                _ => (Some(OutputShape::Array), None),
            }
        }
        _ => (None, None),
    }
}
