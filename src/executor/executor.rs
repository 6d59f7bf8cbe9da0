use std::collections::HashSet;
use std::sync::Arc;

use async_recursion::async_recursion;
use chrono::Utc;
use futures::future;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::contract::{json_type_name, ToolCategory};
use crate::procedure::{
    OnError, ProcedureDefinition, RunRecord, RunStatus, Step, StepResult,
};
use crate::registry::ToolRegistry;
use crate::template::{is_truthy, render_params, render_str};
use crate::validator::{ProcedureValidator, ValidatorHints};

use super::{dispatch_step, ExecutorError, RunContext};

const RUN_CANCELLED: &str = "Run cancelled";

/// Caller-side knobs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Caller-supplied parameter values; defaults fill the rest.
    pub params: Map<String, Value>,
    pub dry_run: bool,
    pub org_id: Option<Uuid>,
    pub cancel: Option<CancellationToken>,
    /// Skip validation; the caller asserts it already passed.
    pub assume_validated: bool,
}

impl RunOptions {
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_org(mut self, org_id: Uuid) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn assume_validated(mut self) -> Self {
        self.assume_validated = true;
        self
    }
}

/// Failure bookkeeping threaded through the run. `aborted` is set by the
/// first step that fails under the `fail` policy (or by cancellation) and
/// stops all outer loops.
#[derive(Debug, Default)]
struct RunTally {
    failures: usize,
    skipped_failures: usize,
    aborted: Option<String>,
}

impl RunTally {
    fn failed_any(&self) -> bool {
        self.failures + self.skipped_failures > 0
    }

    fn absorb(&mut self, other: RunTally) {
        self.failures += other.failures;
        self.skipped_failures += other.skipped_failures;
        if self.aborted.is_none() {
            self.aborted = other.aborted;
        }
    }
}

/// Top-level run loop: owns the context, walks the step list, dispatches
/// steps, expands flow directives, and assembles the run record.
pub struct ProcedureExecutor {
    registry: Arc<ToolRegistry>,
    validator: ProcedureValidator,
}

impl ProcedureExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        registry.initialize();
        let validator = ProcedureValidator::new(registry.clone());
        Self {
            registry,
            validator,
        }
    }

    pub fn with_hints(mut self, hints: ValidatorHints) -> Self {
        self.validator = ProcedureValidator::new(self.registry.clone()).with_hints(hints);
        self
    }

    /// Execute a procedure and produce its run record.
    ///
    /// Static validation failures and missing required caller parameters
    /// return `Err` before any side effect; runtime failures return an
    /// `Ok` record whose status reflects the outcome.
    pub async fn run(
        &self,
        definition: &ProcedureDefinition,
        options: RunOptions,
    ) -> Result<RunRecord, ExecutorError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!("Starting run {run_id} for procedure '{}'", definition.slug);

        if !options.assume_validated {
            let report = self.validator.validate(definition);
            if !report.is_valid() {
                log::warn!(
                    "Run {run_id} rejected: {} validation error(s)",
                    report.errors.len()
                );
                return Err(ExecutorError::ValidationFailed(report));
            }
        }

        let params = resolve_run_params(definition, options.params)?;
        let mut ctx = RunContext::new(
            params,
            options.dry_run,
            options.org_id,
            options.cancel.unwrap_or_default(),
        );
        let mut tally = RunTally::default();

        self.run_steps(&definition.steps, &mut ctx, definition.on_error, &mut tally)
            .await;

        let status = if tally.aborted.is_some() {
            RunStatus::Failed
        } else if tally.failed_any() {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };
        log::info!("Run {run_id} finished with status {status:?}");

        Ok(RunRecord {
            run_id,
            status,
            started_at,
            ended_at: Utc::now(),
            steps: ctx.steps,
            error: tally.aborted,
        })
    }

    /// Walk one step list in order. Called recursively for branch lists;
    /// `default_policy` is the procedure-level error policy.
    #[async_recursion]
    async fn run_steps(
        &self,
        steps: &[Step],
        ctx: &mut RunContext,
        default_policy: OnError,
        tally: &mut RunTally,
    ) {
        for step in steps {
            if tally.aborted.is_some() {
                break;
            }
            if ctx.cancel.is_cancelled() {
                tally.aborted = Some(RUN_CANCELLED.to_string());
                break;
            }

            let policy = step.effective_policy(default_policy);

            if let Some(condition) = &step.condition {
                match render_str(condition, &ctx.render_scope()) {
                    Ok(value) if !is_truthy(&value) => {
                        log::debug!("Step '{}' skipped: condition is falsy", step.name);
                        ctx.record(step.name.as_str(), StepResult::skipped("Condition evaluated to false"));
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let result =
                            StepResult::failed(format!("Condition rendering failed: {e}"));
                        self.apply_policy(step, result, policy, ctx, tally);
                        continue;
                    }
                }
            }

            if let Some(foreach_expr) = &step.foreach {
                let result = self.run_legacy_foreach(step, foreach_expr, ctx).await;
                self.apply_policy(step, result, policy, ctx, tally);
                continue;
            }

            let is_flow = self
                .registry
                .contract(&step.function)
                .is_some_and(|c| c.category == ToolCategory::Flow);
            if is_flow {
                self.run_flow_step(step, ctx, default_policy, policy, tally).await;
            } else {
                let result = dispatch_step(self.registry.as_ref(), step, ctx).await;
                self.apply_policy(step, result, policy, ctx, tally);
            }
        }
    }

    /// Record a step outcome under its error policy.
    fn apply_policy(
        &self,
        step: &Step,
        result: StepResult,
        policy: OnError,
        ctx: &mut RunContext,
        tally: &mut RunTally,
    ) {
        if !result.is_failed() {
            ctx.record(step.name.as_str(), result);
            return;
        }

        let error = result
            .error
            .clone()
            .unwrap_or_else(|| "step failed".to_string());
        match policy {
            OnError::Fail => {
                log::warn!("Step '{}' failed, aborting run: {error}", step.name);
                ctx.record(step.name.as_str(), result);
                tally.aborted = Some(format!("Step '{}' failed: {error}", step.name));
            }
            OnError::Skip => {
                log::warn!("Step '{}' failed, recording as skipped: {error}", step.name);
                let mut skipped = StepResult::skipped("Step failed and was skipped");
                skipped.error = Some(error);
                ctx.record(step.name.as_str(), skipped);
                tally.skipped_failures += 1;
            }
            OnError::Continue => {
                log::warn!("Step '{}' failed, continuing: {error}", step.name);
                ctx.record(step.name.as_str(), result);
                tally.failures += 1;
            }
        }
    }

    /// Dispatch a flow-primitive step and expand its directive.
    async fn run_flow_step(
        &self,
        step: &Step,
        ctx: &mut RunContext,
        default_policy: OnError,
        policy: OnError,
        tally: &mut RunTally,
    ) {
        let result = dispatch_step(self.registry.as_ref(), step, ctx).await;
        if result.is_failed() {
            self.apply_policy(step, result, policy, ctx, tally);
            return;
        }

        let directive = result.flow.clone().unwrap_or_default();

        if directive.items_to_iterate.is_some() {
            self.run_foreach(step, result, ctx, default_policy, tally).await;
        } else if directive.branches_to_run.is_some() {
            self.run_parallel(step, result, ctx, default_policy, tally).await;
        } else {
            // Single-branch selection: if_branch, switch_branch.
            let chosen = directive
                .branch_key
                .as_deref()
                .and_then(|key| step.branches.get_key_value(key))
                .or_else(|| {
                    // Only switch falls back to a declared default case.
                    if step.function == "switch_branch" {
                        step.branches.get_key_value("default")
                    } else {
                        None
                    }
                });

            let executed = chosen.map(|(name, _)| json!(name)).unwrap_or(Value::Null);
            ctx.record(step.name.as_str(), result.with_metadata("executed_branch", executed));

            if let Some((_, branch_steps)) = chosen {
                self.run_steps(branch_steps, ctx, default_policy, tally).await;
            }
        }
    }

    /// Fan out the declared branches concurrently, each on a clone of the
    /// pre-fork context; merge their new step results back after all
    /// complete.
    async fn run_parallel(
        &self,
        step: &Step,
        mut result: StepResult,
        ctx: &mut RunContext,
        default_policy: OnError,
        tally: &mut RunTally,
    ) {
        let requested = result
            .flow
            .as_ref()
            .and_then(|f| f.branches_to_run.clone())
            .unwrap_or_default();
        let selected: Vec<(&String, &Vec<Step>)> = step
            .branches
            .iter()
            .filter(|(name, _)| requested.is_empty() || requested.contains(*name))
            .collect();

        let max_concurrency = result
            .data
            .get("max_concurrency")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let permits = if max_concurrency == 0 {
            selected.len().max(1)
        } else {
            max_concurrency
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let pre_fork: HashSet<String> = ctx.steps.keys().cloned().collect();

        let branch_futures = selected.into_iter().map(|(name, branch_steps)| {
            let semaphore = semaphore.clone();
            let mut branch_ctx = ctx.fork();
            async move {
                let _permit = semaphore.acquire().await.ok();
                let mut branch_tally = RunTally::default();
                self.run_steps(branch_steps, &mut branch_ctx, default_policy, &mut branch_tally)
                    .await;
                (name, branch_ctx, branch_tally)
            }
        });

        let outcomes = future::join_all(branch_futures).await;

        let mut branch_summaries = Map::new();
        for (name, branch_ctx, branch_tally) in outcomes {
            let mut new_steps: Vec<String> = branch_ctx
                .steps
                .keys()
                .filter(|k| !pre_fork.contains(*k))
                .cloned()
                .collect();
            new_steps.sort();

            branch_summaries.insert(
                name.clone(),
                json!({
                    "steps": new_steps,
                    "failed": branch_tally.failed_any() || branch_tally.aborted.is_some(),
                }),
            );

            for step_name in new_steps {
                if let Some(step_result) = branch_ctx.steps.get(&step_name) {
                    ctx.record(step_name.clone(), step_result.clone());
                }
            }
            tally.absorb(branch_tally);
        }

        if let Value::Object(data) = &mut result.data {
            data.insert("branches".into(), Value::Object(branch_summaries));
        }
        ctx.record(step.name.as_str(), result);
    }

    /// Run the `each` branch once per item, sequentially, each iteration in
    /// a fresh inner scope. Iteration-local step results are collected into
    /// the flow step's data, not merged into the parent context.
    async fn run_foreach(
        &self,
        step: &Step,
        mut result: StepResult,
        ctx: &mut RunContext,
        default_policy: OnError,
        tally: &mut RunTally,
    ) {
        let items = result
            .flow
            .as_ref()
            .and_then(|f| f.items_to_iterate.clone())
            .unwrap_or_default();
        let each_steps = step.branches.get("each");

        let pre_loop: HashSet<String> = ctx.steps.keys().cloned().collect();
        let mut iterations = Vec::new();
        let mut failed_iterations = 0usize;

        if let Some(each_steps) = each_steps {
            for (index, item) in items.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    tally.aborted = Some(RUN_CANCELLED.to_string());
                    break;
                }

                let mut iter_ctx = ctx.fork_iteration(item.clone(), index);
                let mut iter_tally = RunTally::default();
                self.run_steps(each_steps, &mut iter_ctx, default_policy, &mut iter_tally)
                    .await;

                let iter_steps: Map<String, Value> = iter_ctx
                    .steps
                    .iter()
                    .filter(|(name, _)| !pre_loop.contains(*name))
                    .map(|(name, res)| {
                        (name.clone(), serde_json::to_value(res).unwrap_or(Value::Null))
                    })
                    .collect();

                let failed = iter_tally.failed_any() || iter_tally.aborted.is_some();
                if failed {
                    failed_iterations += 1;
                }
                iterations.push(json!({
                    "item_index": index,
                    "steps": iter_steps,
                    "failed": failed,
                }));

                let aborted = iter_tally.aborted.is_some();
                tally.absorb(iter_tally);
                if aborted {
                    break;
                }
            }
        }

        result.items_processed = iterations.len() - failed_iterations;
        result.items_failed = failed_iterations;
        if let Value::Object(data) = &mut result.data {
            data.insert("iterations".into(), Value::Array(iterations));
        }
        ctx.record(step.name.as_str(), result);
    }

    /// Legacy single-step iteration: render the binding to a list, then run
    /// this step's tool once per item with the loop scope bound. The step's
    /// result aggregates per-item outcomes.
    async fn run_legacy_foreach(
        &self,
        step: &Step,
        foreach_expr: &str,
        ctx: &RunContext,
    ) -> StepResult {
        let items = match render_str(foreach_expr, &ctx.render_scope()) {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                return StepResult::failed(format!(
                    "'foreach' must resolve to a list, got {}",
                    json_type_name(&other)
                ));
            }
            Err(e) => return StepResult::failed(format!("Template rendering failed: {e}")),
        };

        let Some(tool) = self.registry.get(&step.function) else {
            return StepResult::failed(format!("Unknown tool: '{}'", step.function));
        };

        let total = items.len();
        let mut data = Vec::with_capacity(total);
        let mut failed = 0usize;

        for (index, item) in items.into_iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return StepResult::failed(RUN_CANCELLED);
            }

            let iter_ctx = ctx.fork_iteration(item, index);
            let rendered = match render_params(&step.params, &iter_ctx.render_scope()) {
                Ok(rendered) => rendered,
                Err(e) => {
                    failed += 1;
                    data.push(json!({ "error": e.to_string() }));
                    continue;
                }
            };

            let result = tool.call(&iter_ctx.invocation_context(), rendered).await;
            if result.is_failed() {
                failed += 1;
                data.push(json!({ "error": result.error }));
            } else {
                data.push(result.data);
            }
        }

        let processed = total - failed;
        if failed == 0 {
            let mut result = StepResult::success(Value::Array(data));
            result.items_processed = processed;
            result
        } else if processed > 0 {
            StepResult::partial(Value::Array(data), processed, failed)
        } else {
            let mut result = StepResult::failed(format!("All {total} iterations failed"));
            result.data = Value::Array(data);
            result.items_failed = failed;
            result
        }
    }
}

fn resolve_run_params(
    definition: &ProcedureDefinition,
    caller: Map<String, Value>,
) -> Result<Map<String, Value>, ExecutorError> {
    let mut resolved = caller;
    for param in &definition.parameters {
        if resolved.contains_key(&param.name) {
            continue;
        }
        if let Some(default) = &param.default {
            resolved.insert(param.name.clone(), default.clone());
        } else if param.required {
            return Err(ExecutorError::MissingParameter(param.name.clone()));
        }
    }
    Ok(resolved)
}
