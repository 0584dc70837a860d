//! Core event types emitted by sessions and the coordinator.
//!
//! Session events form a total order per session; consumers observe them via
//! a handle subscription or the coordinator's multiplexed stream. The shapes
//! serialize with an external `type` tag so they can be forwarded to SSE or
//! log sinks unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::{RunMetrics, SessionId};
use crate::status::AgentStatus;
use crate::suspend::PendingRequest;

/// Terminal outcome of a session run, carried by the `done` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metrics: RunMetrics,
}

/// Events emitted by one agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A status transition.
    Status { status: AgentStatus },

    /// Incremental assistant text. `final` marks the end of one text block.
    Output {
        text: String,
        #[serde(rename = "final")]
        is_final: bool,
    },

    /// Reasoning content from the model.
    Thought { content: String },

    /// A tool invocation has started.
    ToolStart {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },

    /// Intermediate progress from a running tool.
    ToolProgress {
        tool_call_id: String,
        tool_name: String,
        progress: Value,
    },

    /// A tool invocation finished.
    ToolEnd {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    /// The session suspended on one or more pending requests.
    Suspended { pending_requests: Vec<PendingRequest> },

    /// A recoverable or fatal error.
    Error { message: String, fatal: bool },

    /// Terminal event: the session reached a terminal status.
    Done { result: AgentResult },
}

impl AgentEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Events emitted by the coordinator, multiplexing all sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A new session was spawned (or restored via continue).
    AgentSpawned {
        session_id: SessionId,
        tags: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<SessionId>,
    },

    /// A session event, re-emitted with its session id.
    AgentEvent {
        session_id: SessionId,
        event: AgentEvent,
    },

    /// A session reached its terminal event; any configured checkpoint has
    /// been persisted by the time this fires.
    AgentDone {
        session_id: SessionId,
        result: AgentResult,
    },
}
