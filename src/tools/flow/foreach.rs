use async_trait::async_trait;
use indoc::indoc;
use serde_json::{json, Map, Value};

use crate::contract::{OutputField, OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
use crate::procedure::{FlowDirective, StepResult};
use crate::tools::{InvocationContext, Tool, ToolError};

/// Iterate the `each` branch over a rendered list.
///
/// The directive carries the resolved items; the executor runs the branch
/// once per item with `item` and `item_index` bound, each iteration in a
/// fresh inner scope.
pub struct ForeachTool {
    meta: ToolMeta,
}

impl Default for ForeachTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ForeachTool {
    pub fn new() -> Self {
        let meta = ToolMeta::new(
            "foreach",
            ToolCategory::Flow,
            indoc! {"
                Run the 'branches.each' steps once per item of a list. Inside the branch,
                'item' and 'item_index' are in scope. REQUIRES 'branches.each'."},
        )
        .parameters([ParameterSpec::array("items", ParamType::Any)
            .description("The list to iterate over, usually a template reference")
            .example(json!("{{ steps.search }}"))])
        .output(
            OutputSpec::new(ParamType::Object, "Iteration plan").fields([
                OutputField::new("item_count", ParamType::Integer, "Number of items to iterate"),
            ]),
        )
        .tags(["flow", "foreach", "iteration", "loop"]);
        Self { meta }
    }
}

#[async_trait]
impl Tool for ForeachTool {
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

        log::info!("[foreach] iterating {} items", items.len());

        Ok(StepResult::success(json!({ "item_count": items.len() }))
            .with_message(format!("Iterating {} items", items.len()))
            .with_flow(FlowDirective {
                items_to_iterate: Some(items),
                ..FlowDirective::default()
            }))
    }
}
