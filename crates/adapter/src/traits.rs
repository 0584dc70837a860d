//! Adapter contracts: the model-streaming boundary and the instance surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use muster_domain::stream::BoxStream;
use muster_domain::{
    AgentCheckpoint, AgentEvent, AgentInput, AgentResult, AgentStatus, CheckpointMessage,
    PendingRequest, PendingResolution, Result, RunMetrics, SessionId,
};
use muster_guidance::{GuidanceContext, SkillSet};
use muster_tools::ToolRegistry;

use crate::codec::NativeMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model streaming boundary
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events produced by a streaming model backend during one round.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    TextDelta { text: String },
    TextEnd,
    ThinkingDelta { text: String },
    ToolUse { id: String, name: String, input: Value },
    /// End of the round, with the backend's stop reason.
    End { stop_reason: Option<String> },
}

/// Why and how the backend's last recorded message ended.
#[derive(Debug, Clone)]
pub struct StopInfo {
    pub stop_reason: Option<String>,
    pub error: Option<String>,
}

impl StopInfo {
    pub fn is_error(&self) -> bool {
        self.stop_reason.as_deref() == Some("error")
    }
}

/// The raw model-streaming backend behind one session.
///
/// Implementations own the native transcript: every pushed message and every
/// streamed round is recorded, so `messages()` is always the full
/// conversation as the backend sees it.
#[async_trait]
pub trait ModelStream: Send + Sync {
    /// Stream one model round against the current transcript.
    async fn stream_turn(&self) -> Result<BoxStream<'static, Result<ModelEvent>>>;

    /// Append a user message before the next round.
    fn push_user(&self, text: &str);

    /// Append a tool result answering a prior `tool_use`.
    fn push_tool_result(&self, tool_call_id: &str, tool_name: &str, content: &str, is_error: bool);

    /// Deliver a mid-turn follow-up message (the steering channel). The
    /// backend batches it per its own policy.
    fn steer(&self, text: &str);

    /// Cooperatively abort the in-flight round.
    fn abort(&self);

    /// The full native transcript.
    fn messages(&self) -> Vec<NativeMessage>;

    /// Stop information of the last recorded assistant message.
    fn stop_info(&self) -> Option<StopInfo>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter and instance contracts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session execution limits.
#[derive(Debug, Clone)]
pub struct AgentLimits {
    /// Maximum model/tool rounds inside one prompt turn.
    pub max_tool_rounds: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self { max_tool_rounds: 25 }
    }
}

/// Context assembled by the coordinator's injector pipeline.
#[derive(Debug, Clone, Default)]
pub struct ContextInjection {
    /// Extra system-prompt material (spawn path).
    pub system_context: Option<String>,
    /// Messages appended after the checkpoint transcript (continue path).
    pub resume_messages: Option<Vec<CheckpointMessage>>,
}

/// Everything an adapter needs to create or restore an instance.
pub struct AdapterCreateConfig {
    pub session_id: SessionId,
    pub guidance: Arc<GuidanceContext>,
    pub task: Option<String>,
    pub limits: AgentLimits,
    pub input: Option<AgentInput>,
    pub parent_id: Option<SessionId>,
    pub tools: Arc<ToolRegistry>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
    pub skills: Option<Arc<SkillSet>>,
    pub context_injection: Option<ContextInjection>,
}

impl AdapterCreateConfig {
    pub fn new(session_id: SessionId, guidance: Arc<GuidanceContext>) -> Self {
        Self {
            session_id,
            guidance,
            task: None,
            limits: AgentLimits::default(),
            input: None,
            parent_id: None,
            tools: Arc::new(ToolRegistry::new()),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
            skills: None,
            context_injection: None,
        }
    }
}

/// A running (or restorable) per-agent state machine.
///
/// Instances guarantee that tool executions receive a `ToolContext` carrying
/// the session cancel token and a seeded step context, that tool suspensions
/// surface as pending requests plus a `suspended` event, and that restoration
/// preserves `id`, `created_at` and the turn count.
#[async_trait]
pub trait AgentInstance: Send + Sync {
    fn id(&self) -> SessionId;

    fn created_at(&self) -> DateTime<Utc>;

    fn status(&self) -> AgentStatus;

    /// Drive the session until it reaches a terminal status, emitting every
    /// event through `events`. Called once, by the handle.
    async fn run(&self, events: mpsc::UnboundedSender<AgentEvent>) -> Result<()>;

    /// Queue input (or steer it into the running turn).
    fn send(&self, input: AgentInput);

    fn pause(&self);

    fn resume(&self);

    fn abort(&self);

    /// Apply resolutions to pending suspensions.
    fn resolve(&self, resolutions: Vec<PendingResolution>);

    fn pending_requests(&self) -> Vec<PendingRequest>;

    /// Snapshot the session. Safe in any state; never mutates.
    fn checkpoint(&self) -> AgentCheckpoint;

    fn metrics(&self) -> RunMetrics;

    /// Force a terminal status. Returns the synthetic terminal result, or
    /// `None` when the session already ended.
    fn terminate(&self, reason: Option<String>) -> Option<AgentResult>;
}

/// A model back-end plugged into the coordinator.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn model_provider(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Create a fresh instance.
    async fn create(&self, config: AdapterCreateConfig) -> Result<Arc<dyn AgentInstance>>;

    /// Restore an instance from a checkpoint.
    async fn restore(
        &self,
        checkpoint: AgentCheckpoint,
        config: AdapterCreateConfig,
    ) -> Result<Arc<dyn AgentInstance>>;
}
