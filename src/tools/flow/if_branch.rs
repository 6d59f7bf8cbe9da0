use async_trait::async_trait;
use indoc::indoc;
use serde_json::{json, Map, Value};

use crate::contract::{OutputField, OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
use crate::procedure::{FlowDirective, StepResult};
use crate::template::is_truthy;
use crate::tools::{InvocationContext, Tool, ToolError};

/// Evaluate a condition and route execution to the `then` or `else` branch.
///
/// The condition has already been rendered by the executor; this tool only
/// evaluates the truthiness of the rendered value and returns a directive
/// naming the branch. The executor runs the branch's steps.
pub struct IfBranchTool {
    meta: ToolMeta,
}

impl Default for IfBranchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl IfBranchTool {
    pub fn new() -> Self {
        let meta = ToolMeta::new(
            "if_branch",
            ToolCategory::Flow,
            indoc! {"
                Evaluate a condition and execute one of two branches. REQUIRES 'branches.then'
                containing steps to run when truthy. Optional 'branches.else' runs when falsy."},
        )
        .parameters([ParameterSpec::new("condition", ParamType::Any)
            .description(
                "Template expression evaluated for truthiness. Truthy runs the 'then' branch, \
                 falsy the 'else' branch.",
            )
            .example(json!("{{ steps.search | length > 0 }}"))])
        .output(
            OutputSpec::new(ParamType::Object, "Which branch the condition selected").fields([
                OutputField::new("condition_value", ParamType::Any, "The rendered condition value"),
                OutputField::new("evaluated", ParamType::Boolean, "Truthiness of the condition"),
                OutputField::new("branch", ParamType::String, "Branch to execute: 'then' or 'else'"),
            ]),
        )
        .tags(["flow", "branching", "conditional", "if", "else"]);
        Self { meta }
    }
}

#[async_trait]
impl Tool for IfBranchTool {
    fn meta(&self) -> &ToolMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        params: Map<String, Value>,
    ) -> Result<StepResult, ToolError> {
        let condition = params.get("condition").cloned().unwrap_or(Value::Null);
        let evaluated = is_truthy(&condition);
        let branch = if evaluated { "then" } else { "else" };

        log::info!("[if_branch] condition={condition:?} evaluated={evaluated} -> branch={branch}");

        Ok(StepResult::success(json!({
            "condition_value": condition,
            "evaluated": evaluated,
            "branch": branch,
        }))
        .with_message(format!("Condition is {evaluated}, executing '{branch}' branch"))
        .with_flow(FlowDirective {
            branch_key: Some(branch.to_string()),
            ..FlowDirective::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_truthy_selects_then() {
        let tool = IfBranchTool::new();
        let params = serde_json::from_value(json!({"condition": true})).unwrap();
        let result = tool.call(&InvocationContext::default(), params).await;
        assert!(result.is_success());
        assert_eq!(result.flow.unwrap().branch_key.as_deref(), Some("then"));
    }

    #[tokio::test]
    async fn test_falsy_selects_else() {
        let tool = IfBranchTool::new();
        for falsy in [json!(""), json!("false"), json!(0), json!([])] {
            let params = serde_json::from_value(json!({"condition": falsy})).unwrap();
            let result = tool.call(&InvocationContext::default(), params).await;
            assert_eq!(result.flow.unwrap().branch_key.as_deref(), Some("else"));
        }
    }
}
