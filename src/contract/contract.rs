use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ExposureProfile, OutputVariant, ParamType, PayloadProfile, ToolCategory, ToolMeta};

/// Formal, immutable contract for a registered tool: JSON-Schema input and
/// output shapes plus governance metadata. Generated from [`ToolMeta`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContract {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub version: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub side_effects: bool,
    pub is_primitive: bool,
    pub payload_profile: PayloadProfile,
    pub exposure_profile: ExposureProfile,
    pub requires_llm: bool,
    pub requires_session: bool,
    pub tags: Vec<String>,
}

impl ToolContract {
    pub fn from_meta(meta: &ToolMeta) -> Self {
        Self {
            name: meta.name.clone(),
            description: meta.description.clone(),
            category: meta.category,
            version: meta.version.clone(),
            input_schema: input_schema(meta),
            output_schema: output_schema(meta),
            side_effects: meta.side_effects,
            is_primitive: meta.is_primitive,
            payload_profile: meta.payload_profile,
            exposure_profile: meta.exposure_profile,
            requires_llm: meta.requires_llm,
            requires_session: meta.requires_session,
            tags: meta.tags.clone(),
        }
    }

    /// Property map of the input schema, when declared.
    pub fn input_properties(&self) -> Option<&Map<String, Value>> {
        self.input_schema.get("properties")?.as_object()
    }

    /// Names of required input parameters.
    pub fn required_inputs(&self) -> BTreeSet<String> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn input_schema(meta: &ToolMeta) -> Value {
    if meta.parameters.is_empty() {
        return serde_json::json!({ "type": "object", "properties": {}, "required": [] });
    }

    let mut properties = Map::new();
    let mut required = Vec::new();
    for spec in &meta.parameters {
        properties.insert(spec.name.clone(), spec.to_property_schema());
        if spec.required {
            required.push(Value::String(spec.name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert("type".into(), Value::String("object".into()));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    Value::Object(schema)
}

fn output_schema(meta: &ToolMeta) -> Value {
    let Some(output) = &meta.output else {
        return serde_json::json!({ "type": "object", "description": "Tool output" });
    };

    let mut schema = match output.to_schema() {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    if !meta.output_variants.is_empty() {
        let variants: Vec<Value> = meta.output_variants.iter().map(variant_schema).collect();
        schema.insert("variants".into(), Value::Array(variants));
    }

    Value::Object(schema)
}

fn variant_schema(variant: &OutputVariant) -> Value {
    let mut schema = match variant.spec.ty.schema_fragment() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    schema.insert(
        "description".into(),
        Value::String(format!("{}: {}", variant.mode, variant.condition)),
    );

    if !variant.spec.fields.is_empty() {
        let properties: Map<String, Value> = variant
            .spec
            .fields
            .iter()
            .map(|f| {
                let mut prop = match f.ty.schema_fragment() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                if !f.description.is_empty() {
                    prop.insert("description".into(), Value::String(f.description.clone()));
                }
                (f.name.clone(), Value::Object(prop))
            })
            .collect();
        match variant.spec.ty {
            ParamType::Object => {
                schema.insert("properties".into(), Value::Object(properties));
            }
            ParamType::Array => {
                schema.insert(
                    "items".into(),
                    serde_json::json!({ "type": "object", "properties": properties }),
                );
            }
            _ => {}
        }
    }

    Value::Object(schema)
}
