use async_trait::async_trait;
use indoc::indoc;
use serde_json::{json, Map, Value};

use crate::contract::{OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
use crate::filters::{matches_where, validate_where, where_schema};
use crate::procedure::StepResult;
use crate::tools::{InvocationContext, Tool, ToolError};

/// Keep the items of a list that satisfy every `where` condition.
///
/// The in-engine consumer of the shared `where` standard: conditions are
/// validated with `validate_where` and evaluated per item with
/// `matches_where`, no backing store involved.
pub struct FilterItemsTool {
    meta: ToolMeta,
}

impl Default for FilterItemsTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterItemsTool {
    pub fn new() -> Self {
        let meta = ToolMeta::new(
            "filter_items",
            ToolCategory::Logic,
            indoc! {"
                Keep the items of a list that match every 'where' condition. Each condition
                names a field (dotted path into the item), an operator, and an optional
                value; conditions are ANDed together."},
        )
        .parameters([
            ParameterSpec::array("items", ParamType::Any)
                .description("The list to filter, usually a template reference")
                .example(json!("{{ steps.search }}")),
            ParameterSpec::array("where", ParamType::Object).with_schema(where_schema()),
        ])
        .output(OutputSpec::new(ParamType::Array, "Items that matched every condition"))
        .tags(["logic", "filter", "where"])
        .no_session();
        Self { meta }
    }
}

#[async_trait]
impl Tool for FilterItemsTool {
    fn meta(&self) -> &ToolMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        params: Map<String, Value>,
    ) -> Result<StepResult, ToolError> {
        let items = match params.get("items") {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return Err(ToolError::InvalidInput(format!(
                    "'items' must be a list, got {}",
                    crate::contract::json_type_name(other)
                )));
            }
            None => Vec::new(),
        };

        let conditions = params.get("where").cloned().unwrap_or(Value::Array(Vec::new()));
        let findings = validate_where(&conditions);
        if !findings.is_empty() {
            return Err(ToolError::InvalidInput(findings.join("; ")));
        }
        let conditions = conditions.as_array().cloned().unwrap_or_default();

        let total = items.len();
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| matches_where(item, &conditions))
            .collect();

        log::debug!("[filter_items] kept {} of {total} items", kept.len());

        let matched = kept.len();
        Ok(StepResult::success(Value::Array(kept))
            .with_message(format!("{matched} of {total} items matched")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filters_by_conditions() {
        let tool = FilterItemsTool::new();
        let params = serde_json::from_value(json!({
            "items": [
                {"source": {"agency": "GSA"}, "title": "keep"},
                {"source": {"agency": "DOD"}, "title": "drop"},
                {"title": "no agency"}
            ],
            "where": [{"field": "source.agency", "op": "eq", "value": "GSA"}]
        }))
        .unwrap();

        let result = tool.call(&InvocationContext::default(), params).await;
        assert!(result.is_success());
        assert_eq!(result.data, json!([{"source": {"agency": "GSA"}, "title": "keep"}]));
        assert_eq!(result.message.as_deref(), Some("1 of 3 items matched"));
    }

    #[tokio::test]
    async fn test_empty_conditions_keep_everything() {
        let tool = FilterItemsTool::new();
        let params = serde_json::from_value(json!({
            "items": [{"a": 1}, {"a": 2}],
            "where": []
        }))
        .unwrap();

        let result = tool.call(&InvocationContext::default(), params).await;
        assert_eq!(result.data.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_conditions_fail_the_step() {
        let tool = FilterItemsTool::new();
        let params = serde_json::from_value(json!({
            "items": [{"a": 1}],
            "where": [{"field": "a.b", "op": "like", "value": "x"}]
        }))
        .unwrap();

        let result = tool.call(&InvocationContext::default(), params).await;
        assert!(result.is_failed());
        assert!(result.error.as_deref().unwrap().contains("unknown operator 'like'"));
    }
}
