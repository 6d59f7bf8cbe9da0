use crate::procedure::{Step, StepResult};
use crate::registry::ToolRegistry;
use crate::template::render_params;

use super::RunContext;

/// Resolve a step's parameters against the context and invoke its tool.
///
/// Every failure mode becomes a failed [`StepResult`] so the caller can
/// apply the step's error policy uniformly: template-render errors, a
/// registry miss (only reachable when validation was skipped), and
/// tool-reported failures all land in the same shape.
pub(crate) async fn dispatch_step(
    registry: &ToolRegistry,
    step: &Step,
    ctx: &RunContext,
) -> StepResult {
    let rendered = match render_params(&step.params, &ctx.render_scope()) {
        Ok(rendered) => rendered,
        Err(e) => {
            log::warn!("Step '{}' failed to render params: {e}", step.name);
            return StepResult::failed(format!("Template rendering failed: {e}"));
        }
    };

    let Some(tool) = registry.get(&step.function) else {
        return StepResult::failed(format!("Unknown tool: '{}'", step.function));
    };

    log::debug!("Dispatching step '{}' -> tool '{}'", step.name, step.function);
    tool.call(&ctx.invocation_context(), rendered).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use tokio_util::sync::CancellationToken;

    fn step(value: serde_json::Value) -> Step {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_renders_and_invokes() {
        let registry = ToolRegistry::with_builtins();
        let mut ctx = RunContext::new(
            serde_json::from_value::<Map<_, _>>(json!({"who": "world"})).unwrap(),
            false,
            None,
            CancellationToken::new(),
        );
        ctx.record("greet", StepResult::success(json!("hi")));

        let step = step(json!({
            "name": "say", "function": "log",
            "params": {"message": "{{ steps.greet }} {{ params.who }}"}
        }));
        let result = dispatch_step(&registry, &step, &ctx).await;
        assert!(result.is_success());
        assert_eq!(result.data, json!("hi world"));
    }

    #[tokio::test]
    async fn test_render_error_becomes_failed_result() {
        let registry = ToolRegistry::with_builtins();
        let ctx = RunContext::new(Map::new(), false, None, CancellationToken::new());
        let step = step(json!({
            "name": "say", "function": "log",
            "params": {"message": "{{ steps.nope }}"}
        }));
        let result = dispatch_step(&registry, &step, &ctx).await;
        assert!(result.is_failed());
        assert!(result.error.as_deref().unwrap().contains("steps.nope"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_failed_result() {
        let registry = ToolRegistry::new();
        let ctx = RunContext::new(Map::new(), false, None, CancellationToken::new());
        let step = step(json!({"name": "x", "function": "ghost"}));
        let result = dispatch_step(&registry, &step, &ctx).await;
        assert!(result.is_failed());
        assert!(result.error.as_deref().unwrap().contains("ghost"));
    }
}
