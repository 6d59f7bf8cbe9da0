use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::contract::ToolMeta;
use crate::procedure::StepResult;

use super::ToolError;

/// Ambient state handed to every tool invocation. Tools never see the run's
/// step map; references into it are resolved by the engine before dispatch.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Organizational identity passed through to tool backends.
    pub org_id: Option<Uuid>,
    /// When set, tools must not mutate external state.
    pub dry_run: bool,
    /// Cooperative cancellation; checked by the engine at step boundaries
    /// and expected to be honored inside long-running tools.
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn new(org_id: Option<Uuid>, dry_run: bool, cancel: CancellationToken) -> Self {
        Self {
            org_id,
            dry_run,
            cancel,
        }
    }
}

/// A named, contracted unit of work invoked by a procedure step.
///
/// Implementations provide their [`ToolMeta`] and the `invoke` body; the
/// engine always enters through [`Tool::call`], which conforms parameters
/// against the declaration, times the invocation, and converts errors into
/// failed step results so the error policy can apply uniformly.
#[async_trait]
pub trait Tool: Send + Sync {
    fn meta(&self) -> &ToolMeta;

    /// Execute the tool. `params` have been conformed against the declared
    /// parameters: required present (or templates), defaults filled, types
    /// and enums checked. Template-looking strings must be treated as
    /// literal values; the engine has already rendered everything it owns.
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        params: Map<String, Value>,
    ) -> Result<StepResult, ToolError>;

    /// Conform parameters, execute, and wrap the outcome. Never panics and
    /// never returns an error: every failure becomes a failed [`StepResult`].
    /// An already-cancelled run is not dispatched at all.
    async fn call(&self, ctx: &InvocationContext, params: Map<String, Value>) -> StepResult {
        let started = Instant::now();

        if ctx.cancel.is_cancelled() {
            return StepResult::failed(ToolError::Cancelled.to_string());
        }

        let conformed = match self.meta().conform_params(&params) {
            Ok(conformed) => conformed,
            Err(e) => {
                return StepResult::failed(e.to_string())
                    .with_message("Parameter validation failed");
            }
        };

        let mut result = match self.invoke(ctx, conformed).await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Tool {} failed: {e}", self.meta().name);
                StepResult::failed(e.to_string())
            }
        };

        result.duration_ms = Some(started.elapsed().as_millis() as u64);
        result
    }
}
