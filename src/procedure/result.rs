use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Status of one step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    /// Some items succeeded, some failed (collection-mode tools).
    Partial,
    Skipped,
}

/// Returned by flow tools to direct the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDirective {
    /// For `if_branch` / `switch_branch`: the single branch to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_key: Option<String>,
    /// For `parallel`: branch names to run concurrently. Empty means all
    /// declared branches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches_to_run: Option<Vec<String>>,
    /// For `foreach`: the resolved items to iterate over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_to_iterate: Option<Vec<Value>>,
    /// For `foreach`: indices filtered out before iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_indices: Option<Vec<usize>>,
}

/// Uniform result wrapper every tool invocation produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub items_processed: usize,
    #[serde(default)]
    pub items_failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Present only on results returned by flow tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowDirective>,
}

impl StepResult {
    pub fn success(data: Value) -> Self {
        Self {
            status: StepStatus::Success,
            data,
            message: None,
            error: None,
            items_processed: 0,
            items_failed: 0,
            duration_ms: None,
            metadata: Map::new(),
            flow: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            status: StepStatus::Failed,
            data: Value::Null,
            message: Some(format!("Failed: {error}")),
            error: Some(error),
            items_processed: 0,
            items_failed: 0,
            duration_ms: None,
            metadata: Map::new(),
            flow: None,
        }
    }

    pub fn partial(data: Value, items_processed: usize, items_failed: usize) -> Self {
        Self {
            status: StepStatus::Partial,
            data,
            message: Some(format!(
                "Partial success: {items_processed} processed, {items_failed} failed"
            )),
            error: None,
            items_processed,
            items_failed,
            duration_ms: None,
            metadata: Map::new(),
            flow: None,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Skipped,
            data: Value::Null,
            message: Some(message.into()),
            error: None,
            items_processed: 0,
            items_failed: 0,
            duration_ms: None,
            metadata: Map::new(),
            flow: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_flow(mut self, flow: FlowDirective) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Success including partial collection-mode outcomes.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, StepStatus::Success | StepStatus::Partial)
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    /// Compact summary for aggregates and logs. Full data is replaced by its
    /// count, key list, or type name so nested records stay small.
    pub fn summary(&self) -> Value {
        let mut out = Map::new();
        out.insert("status".into(), serde_json::json!(self.status));
        if let Some(message) = &self.message {
            out.insert("message".into(), Value::String(message.clone()));
        }
        match &self.data {
            Value::Null => {}
            Value::Array(items) => {
                out.insert("data_count".into(), Value::from(items.len()));
            }
            Value::Object(map) => {
                out.insert(
                    "data_keys".into(),
                    Value::Array(map.keys().map(|k| Value::String(k.clone())).collect()),
                );
            }
            Value::String(_) => {
                out.insert("data_type".into(), Value::String("string".into()));
            }
            Value::Number(_) => {
                out.insert("data_type".into(), Value::String("number".into()));
            }
            Value::Bool(_) => {
                out.insert("data_type".into(), Value::String("boolean".into()));
            }
        }
        if let Some(error) = &self.error {
            out.insert("error".into(), Value::String(error.clone()));
        }
        if self.items_processed > 0 || self.items_failed > 0 {
            out.insert("items_processed".into(), Value::from(self.items_processed));
            out.insert("items_failed".into(), Value::from(self.items_failed));
        }
        Value::Object(out)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// The structured record a run produces.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub steps: HashMap<String, StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
