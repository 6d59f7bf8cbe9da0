use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::contract::{OutputSpec, ParamType, ParameterSpec, ToolCategory, ToolMeta};
use crate::procedure::StepResult;
use crate::tools::{InvocationContext, Tool, ToolError};

/// Write a message to the engine log. Side-effect free; useful as a sink in
/// procedures and as a marker step in tests.
pub struct LogTool {
    meta: ToolMeta,
}

impl Default for LogTool {
    fn default() -> Self {
        Self::new()
    }
}

impl LogTool {
    pub fn new() -> Self {
        let meta = ToolMeta::new(
            "log",
            ToolCategory::Output,
            "Write a message to the procedure run log.",
        )
        .parameters([
            ParameterSpec::new("message", ParamType::Any)
                .description("The message to log; non-string values are stringified"),
            ParameterSpec::string("level")
                .description("Log level")
                .enum_values([json!("debug"), json!("info"), json!("warning")])
                .default_value(json!("info")),
        ])
        .output(OutputSpec::new(ParamType::String, "The logged message"))
        .tags(["output", "logging", "debug"])
        .no_session();
        Self { meta }
    }
}

#[async_trait]
impl Tool for LogTool {
    fn meta(&self) -> &ToolMeta {
        &self.meta
    }

    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        params: Map<String, Value>,
    ) -> Result<StepResult, ToolError> {
        let message = match params.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string(other)?,
            None => String::new(),
        };

        match params.get("level").and_then(Value::as_str) {
            Some("debug") => log::debug!("[procedure] {message}"),
            Some("warning") => log::warn!("[procedure] {message}"),
            _ => log::info!("[procedure] {message}"),
        }

        Ok(StepResult::success(Value::String(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logs_and_returns_message() {
        let tool = LogTool::new();
        let params = serde_json::from_value(json!({"message": "hello"})).unwrap();
        let result = tool.call(&InvocationContext::default(), params).await;
        assert!(result.is_success());
        assert_eq!(result.data, json!("hello"));
    }

    #[tokio::test]
    async fn test_stringifies_non_string_messages() {
        let tool = LogTool::new();
        let params = serde_json::from_value(json!({"message": 42, "level": "debug"})).unwrap();
        let result = tool.call(&InvocationContext::default(), params).await;
        assert_eq!(result.data, json!("42"));
    }

    #[tokio::test]
    async fn test_rejects_unknown_level() {
        let tool = LogTool::new();
        let params = serde_json::from_value(json!({"message": "x", "level": "loud"})).unwrap();
        let result = tool.call(&InvocationContext::default(), params).await;
        assert!(result.is_failed());
    }
}
