use async_trait::async_trait;
use indoc::indoc;
use serde_json::{json, Map, Value};

use crate::contract::{OutputField, OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
use crate::procedure::{FlowDirective, StepResult};
use crate::tools::{InvocationContext, Tool, ToolError};

/// Fan out all declared branches concurrently.
///
/// The tool does not know the branch names; an empty `branches_to_run` list
/// tells the executor to enumerate and run every branch declared on the
/// step, bounded by `max_concurrency`.
pub struct ParallelTool {
    meta: ToolMeta,
}

impl Default for ParallelTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelTool {
    pub fn new() -> Self {
        let meta = ToolMeta::new(
            "parallel",
            ToolCategory::Flow,
            indoc! {"
                Execute multiple named branches simultaneously. REQUIRES 'branches' with at
                least 2 named branches. Use when steps have no dependencies on each other;
                all branches complete before the procedure continues."},
        )
        .parameters([ParameterSpec::integer("max_concurrency")
            .description("Maximum branches in flight at once. 0 or omitted means no limit.")
            .default_value(json!(0))
            .example(json!(2))])
        .output(
            OutputSpec::new(ParamType::Object, "Parallel fan-out settings").fields([
                OutputField::new(
                    "max_concurrency",
                    ParamType::Integer,
                    "Maximum branches in flight (0 = unlimited)",
                ),
            ]),
        )
        .tags(["flow", "parallel", "concurrent", "branching"]);
        Self { meta }
    }
}

#[async_trait]
impl Tool for ParallelTool {
    fn meta(&self) -> &ToolMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        params: Map<String, Value>,
    ) -> Result<StepResult, ToolError> {
        let max_concurrency = params
            .get("max_concurrency")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        log::info!("[parallel] max_concurrency={max_concurrency} -> running all branches");

        Ok(StepResult::success(json!({ "max_concurrency": max_concurrency }))
            .with_message("Executing all branches in parallel")
            .with_metadata("max_concurrency", json!(max_concurrency))
            .with_flow(FlowDirective {
                branches_to_run: Some(Vec::new()),
                ..FlowDirective::default()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_branch_list_means_all() {
        let tool = ParallelTool::new();
        let result = tool.call(&InvocationContext::default(), Map::new()).await;
        assert!(result.is_success());
        let flow = result.flow.unwrap();
        assert_eq!(flow.branches_to_run, Some(vec![]));
        assert_eq!(result.data["max_concurrency"], json!(0));
    }

    #[tokio::test]
    async fn test_max_concurrency_passthrough() {
        let tool = ParallelTool::new();
        let params = serde_json::from_value(json!({"max_concurrency": 2})).unwrap();
        let result = tool.call(&InvocationContext::default(), params).await;
        assert_eq!(result.data["max_concurrency"], json!(2));
    }
}
