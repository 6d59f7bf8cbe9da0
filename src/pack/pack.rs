use std::sync::Arc;

use serde_json::{Map, Value};

use crate::contract::ToolContract;
use crate::registry::ToolRegistry;

use super::GenerationProfile;

/// A profile-filtered set of tool contracts: what an upstream planner is
/// shown, and what validation checks tool availability against.
#[derive(Debug, Clone)]
pub struct ContractPack {
    pub profile: GenerationProfile,
    pub contracts: Vec<Arc<ToolContract>>,
}

impl ContractPack {
    /// Build a pack from the registry, keeping contracts that pass every
    /// filtering layer:
    ///
    /// 1. exposure profile allows procedure use,
    /// 2. category is allowed by the profile,
    /// 3. tool is not blocked by name,
    /// 4. side-effect tools only when the profile permits them.
    pub fn build(registry: &ToolRegistry, profile: GenerationProfile) -> Self {
        registry.initialize();

        let mut contracts = Vec::new();
        let mut total = 0usize;
        for name in registry.names() {
            let Some(contract) = registry.contract(&name) else {
                continue;
            };
            total += 1;

            if !contract.exposure_profile.procedure {
                continue;
            }
            if !profile.allows_category(contract.category) {
                continue;
            }
            if profile.blocks_tool(&contract.name) {
                continue;
            }
            if contract.side_effects && !profile.allow_side_effects {
                continue;
            }

            contracts.push(contract);
        }

        log::info!(
            "Built contract pack: profile={}, tools={}/{}",
            profile.name,
            contracts.len(),
            total
        );

        Self { profile, contracts }
    }

    /// Sorted names of the tools in the pack.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contracts.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    pub fn contract(&self, name: &str) -> Option<&Arc<ToolContract>> {
        self.contracts.iter().find(|c| c.name == name)
    }

    /// Compact JSON for embedding in a planner prompt. Each tool carries
    /// name, description, category, full input schema, compacted output
    /// schema, side_effects, payload_profile, and requires_llm only when
    /// true.
    pub fn to_prompt_json(&self) -> String {
        let tools: Vec<Value> = self
            .contracts
            .iter()
            .map(|c| {
                let mut entry = Map::new();
                entry.insert("name".into(), Value::String(c.name.clone()));
                entry.insert("description".into(), Value::String(c.description.clone()));
                entry.insert(
                    "category".into(),
                    Value::String(c.category.as_str().to_string()),
                );
                entry.insert("input_schema".into(), c.input_schema.clone());
                entry.insert(
                    "output_schema".into(),
                    compact_output_schema(&c.output_schema),
                );
                entry.insert("side_effects".into(), Value::Bool(c.side_effects));
                entry.insert(
                    "payload_profile".into(),
                    serde_json::json!(c.payload_profile),
                );
                if c.requires_llm {
                    entry.insert("requires_llm".into(), Value::Bool(true));
                }
                Value::Object(entry)
            })
            .collect();

        serde_json::to_string_pretty(&Value::Array(tools)).unwrap_or_default()
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "profile": self.profile.name,
            "tool_count": self.contracts.len(),
            "tools": self.contracts.iter().map(|c| c.as_ref()).collect::<Vec<_>>(),
        })
    }
}

/// Reduce a full output schema to a slim field map for display.
///
/// Strips descriptions, examples, nullable flags, and variant keys, keeping
/// only field names and types:
///
/// ```text
/// {"type":"string"}                              -> {"type":"string"}
/// {"type":"object","properties":{"id":...}}      -> {"type":"object","fields":{"id":"string"}}
/// {"type":"array","items":{"type":"object",...}} -> {"type":"array","item_fields":{"id":"string"}}
/// {"type":"array","items":{"type":"string"}}     -> {"type":"array","items":"string"}
/// {"type":"object"} (no properties)              -> {"type":"object"}
/// ```
///
/// Idempotent: already-compact forms pass through unchanged.
pub fn compact_output_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return Value::Object(Map::new());
    };
    let Some(schema_type) = obj.get("type").and_then(Value::as_str) else {
        return Value::Object(Map::new());
    };

    // Already-compact forms.
    if obj.contains_key("fields") || obj.contains_key("item_fields") {
        let mut kept = Map::new();
        kept.insert("type".into(), Value::String(schema_type.into()));
        for key in ["fields", "item_fields"] {
            if let Some(value) = obj.get(key) {
                kept.insert(key.into(), value.clone());
            }
        }
        return Value::Object(kept);
    }

    match schema_type {
        "string" => serde_json::json!({"type": "string"}),
        "object" => match obj.get("properties").and_then(Value::as_object) {
            Some(props) if !props.is_empty() => {
                serde_json::json!({"type": "object", "fields": field_map(props)})
            }
            _ => serde_json::json!({"type": "object"}),
        },
        "array" => {
            let items = obj.get("items");
            // Compact scalar-items form: {"items": "string"}.
            if let Some(Value::String(item_type)) = items {
                return serde_json::json!({"type": "array", "items": item_type});
            }
            let items = items.and_then(Value::as_object);
            match items.and_then(|i| i.get("type")).and_then(Value::as_str) {
                Some("object") => {
                    match items
                        .and_then(|i| i.get("properties"))
                        .and_then(Value::as_object)
                    {
                        Some(props) if !props.is_empty() => {
                            serde_json::json!({"type": "array", "item_fields": field_map(props)})
                        }
                        _ => serde_json::json!({"type": "array", "items": "object"}),
                    }
                }
                Some(item_type) => serde_json::json!({"type": "array", "items": item_type}),
                None => serde_json::json!({"type": "array"}),
            }
        }
        other => serde_json::json!({ "type": other }),
    }
}

fn field_map(props: &Map<String, Value>) -> Value {
    let fields: Map<String, Value> = props
        .iter()
        .filter(|(name, _)| name.as_str() != "variants")
        .map(|(name, prop)| {
            let ty = prop
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("any")
                .to_string();
            (name.clone(), Value::String(ty))
        })
        .collect();
    Value::Object(fields)
}
