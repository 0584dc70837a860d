use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use muster_steps::StepResult;

use crate::context::ToolContext;

/// Result of a tool execution.
///
/// Errors here are tool-level: they become an error `tool_end` event and a
/// tool-result message for the model, never a session failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
    },
}

impl ToolOutcome {
    pub fn success(output: Value) -> Self {
        Self::Success { output, details: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { error: message.into(), retryable: None }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// A capability the model can invoke.
///
/// `execute` returns through [`StepResult`] so a suspension raised by the
/// tool's step context unwinds with `?` and reaches the session intact.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the tool's input.
    fn parameters(&self) -> Value;

    fn category(&self) -> Option<&str> {
        None
    }

    /// Whether this tool may raise suspensions.
    fn can_suspend(&self) -> bool {
        false
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> StepResult<ToolOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_status_tag() {
        let ok = ToolOutcome::success(serde_json::json!({"x": 1}));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["output"]["x"], 1);

        let err = ToolOutcome::error("nope");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "nope");
        assert!(json.get("retryable").is_none());
    }

    #[test]
    fn is_error_classification() {
        assert!(!ToolOutcome::success(Value::Null).is_error());
        assert!(ToolOutcome::error("x").is_error());
    }
}
