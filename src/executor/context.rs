use std::collections::HashMap;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::procedure::StepResult;
use crate::template::RenderScope;
use crate::tools::InvocationContext;

/// Bindings of the current `foreach` iteration.
#[derive(Debug, Clone)]
pub struct LoopScope {
    pub item: Value,
    pub item_index: usize,
}

/// The per-run bag of resolved caller parameters, prior step results, and
/// loop bindings. Owned and mutated by a single worker; branches run on
/// clones that are merged back by the parent.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub params: Map<String, Value>,
    pub steps: HashMap<String, StepResult>,
    pub loop_scope: Option<LoopScope>,
    pub dry_run: bool,
    pub org_id: Option<Uuid>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(
        params: Map<String, Value>,
        dry_run: bool,
        org_id: Option<Uuid>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            params,
            steps: HashMap::new(),
            loop_scope: None,
            dry_run,
            org_id,
            cancel,
        }
    }

    /// A snapshot for a branch: same params and visible steps, no loop
    /// bindings.
    pub fn fork(&self) -> Self {
        Self {
            params: self.params.clone(),
            steps: self.steps.clone(),
            loop_scope: None,
            dry_run: self.dry_run,
            org_id: self.org_id,
            cancel: self.cancel.clone(),
        }
    }

    /// A snapshot for one `foreach` iteration with `item`/`item_index` bound.
    pub fn fork_iteration(&self, item: Value, item_index: usize) -> Self {
        let mut forked = self.fork();
        forked.loop_scope = Some(LoopScope { item, item_index });
        forked
    }

    pub fn render_scope(&self) -> RenderScope<'_> {
        let scope = RenderScope::new(&self.params, &self.steps);
        match &self.loop_scope {
            Some(loop_scope) => scope.with_loop(&loop_scope.item, loop_scope.item_index),
            None => scope,
        }
    }

    pub fn invocation_context(&self) -> InvocationContext {
        InvocationContext::new(self.org_id, self.dry_run, self.cancel.clone())
    }

    /// Record a step result. Entries are written once per execution of the
    /// enclosing scope; an overwrite indicates colliding step names across
    /// merged branches and is logged.
    pub fn record(&mut self, name: impl Into<String>, result: StepResult) {
        let name = name.into();
        if self.steps.insert(name.clone(), result).is_some() {
            log::warn!("Step result for '{name}' was overwritten");
        }
    }
}
