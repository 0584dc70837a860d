//! Suspension requests and their resolutions.
//!
//! A tool that cannot make progress without an external decision raises a
//! typed suspension. The session surfaces it as a [`PendingRequest`]; the
//! outside world answers with a [`PendingResolution`] matched by
//! `tool_call_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The four kinds of external decision a tool can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionKind {
    UserInput,
    Approval,
    Event,
    Sleep,
}

impl std::fmt::Display for SuspensionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UserInput => "user_input",
            Self::Approval => "approval",
            Self::Event => "event",
            Self::Sleep => "sleep",
        };
        f.write_str(s)
    }
}

/// A typed request constructed by a suspending step operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionRequest {
    pub kind: SuspensionKind,
    /// Kind-specific payload: the question for `user_input`, the action and
    /// description for `approval`, the event name and optional timeout for
    /// `event`, duration and resume time for `sleep`.
    pub payload: Value,
}

/// A suspension surfaced by a session, waiting for an external answer.
///
/// Unique per (session, tool_call_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub kind: SuspensionKind,
    pub payload: Value,
    pub suspended_at: DateTime<Utc>,
}

/// The externally-supplied answer to a pending request.
///
/// Matches at most one [`PendingRequest`]; once consumed the request is
/// removed from the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingResolution {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub cancel: bool,
}

impl PendingResolution {
    /// The value a suspended wait call resumes with: `result` when present,
    /// otherwise the `approved` flag, otherwise null.
    pub fn resume_value(&self) -> Value {
        match (&self.result, self.approved) {
            (Some(v), _) => v.clone(),
            (None, Some(a)) => Value::Bool(a),
            (None, None) => Value::Null,
        }
    }
}

/// The synthesized step id under which a suspension is recorded and later
/// answered. Every wait operation of one tool call shares this sentinel.
pub fn suspension_step_id(tool_call_id: &str) -> String {
    format!("{tool_call_id}:suspended")
}
