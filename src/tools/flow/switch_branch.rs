use async_trait::async_trait;
use indoc::indoc;
use serde_json::{json, Map, Value};

use crate::contract::{OutputField, OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
use crate::procedure::{FlowDirective, StepResult};
use crate::tools::{InvocationContext, Tool, ToolError};

/// Multi-way branching on a rendered value.
///
/// The directive names the stringified value as the branch key; the executor
/// runs that case if declared, falls back to `default` if present, and runs
/// nothing otherwise.
pub struct SwitchBranchTool {
    meta: ToolMeta,
}

impl Default for SwitchBranchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchBranchTool {
    pub fn new() -> Self {
        let meta = ToolMeta::new(
            "switch_branch",
            ToolCategory::Flow,
            indoc! {"
                Route execution to the branch matching a value. REQUIRES at least one named
                case branch; optional 'branches.default' runs when no case matches."},
        )
        .parameters([ParameterSpec::new("value", ParamType::Any)
            .description("Rendered value whose string form selects the case branch")
            .example(json!("{{ steps.classify.category }}"))])
        .output(
            OutputSpec::new(ParamType::Object, "Which case the value selected").fields([
                OutputField::new("value", ParamType::Any, "The rendered switch value"),
                OutputField::new("branch", ParamType::String, "Case branch key"),
            ]),
        )
        .tags(["flow", "branching", "switch", "case"]);
        Self { meta }
    }
}

/// String form of a switch value, matching how case branches are named.
fn branch_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Tool for SwitchBranchTool {
    fn meta(&self) -> &ToolMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        params: Map<String, Value>,
    ) -> Result<StepResult, ToolError> {
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        let key = branch_key(&value);

        log::info!("[switch_branch] value={value:?} -> branch={key}");

        Ok(StepResult::success(json!({
            "value": value,
            "branch": key,
        }))
        .with_message(format!("Switching on '{key}'"))
        .with_flow(FlowDirective {
            branch_key: Some(key),
            ..FlowDirective::default()
        }))
    }
}
