//! Durable tool-execution records.
//!
//! Each tool invocation accumulates a list of completed steps and at most one
//! suspended step. These records are checkpointed verbatim so a tool call can
//! be replayed across process lifetimes without re-executing finished work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::suspend::SuspensionRequest;

/// A step that ran to completion, keyed by its `step_id` within one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedStep {
    pub step_id: String,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

/// The step a tool call is currently suspended on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendedStep {
    pub step_id: String,
    pub request: SuspensionRequest,
    pub suspended_at: DateTime<Utc>,
}

/// Full durable state of one tool invocation.
///
/// Invariant: the step ids in `completed_steps` plus the suspended step id
/// are all distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionState {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input: Value,
    #[serde(default)]
    pub completed_steps: Vec<CompletedStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_step: Option<SuspendedStep>,
}

impl ToolExecutionState {
    pub fn new(tool_call_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
            input,
            completed_steps: Vec::new(),
            suspended_step: None,
        }
    }

    /// Whether a step with this id already completed.
    pub fn has_step(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s.step_id == step_id)
    }
}

/// The resolved value injected into a fresh step context when a previously
/// suspended step has been answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeData {
    pub step_id: String,
    pub result: Value,
}
