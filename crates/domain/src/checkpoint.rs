//! The durable checkpoint schema.
//!
//! A checkpoint is a provider-agnostic snapshot of one session: identity and
//! metadata, guidance state, the full message transcript, the adapter
//! configuration, and every tool-execution record. It is sufficient to
//! restart the session in another process.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::execution::ToolExecutionState;
use crate::message::CheckpointMessage;

/// Opaque, globally unique session identifier. Generated on spawn and
/// preserved across continues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Run metrics accumulated over a session's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    pub duration_ms: u64,
    pub turns: u32,
    pub tool_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

/// Identity and bookkeeping for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SessionId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub metrics: RunMetrics,
}

/// Guidance-related state carried through checkpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuidanceState {
    pub guidance_path: String,
    #[serde(default)]
    pub memory_writes: Vec<String>,
    #[serde(default)]
    pub system_state: BTreeMap<String, Value>,
}

/// Adapter identity and tuning recorded in a checkpoint.
///
/// `provider` and `model` are filled in by the coordinator from the adapter
/// that produced the checkpoint; instances leave them empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterSettings {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A complete, durable snapshot of one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub timestamp: DateTime<Utc>,
    pub adapter_name: String,
    pub session: SessionCheckpoint,
    pub guidance: GuidanceState,
    #[serde(default)]
    pub messages: Vec<CheckpointMessage>,
    #[serde(default)]
    pub adapter_config: AdapterSettings,
    #[serde(default)]
    pub tool_executions: Vec<ToolExecutionState>,
}

impl AgentCheckpoint {
    /// Structural equality of the restart-relevant fields, ignoring the
    /// write timestamp and metric deltas.
    pub fn same_core(&self, other: &Self) -> bool {
        self.adapter_name == other.adapter_name
            && self.session.id == other.session.id
            && self.session.created_at == other.session.created_at
            && self.messages.len() == other.messages.len()
            && self
                .messages
                .iter()
                .zip(other.messages.iter())
                .all(|(a, b)| a.same_content(b))
    }
}
