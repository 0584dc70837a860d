//! Execution context handed to every tool invocation.

use std::sync::Arc;

use serde_json::Value;

use muster_domain::{CancelToken, SessionId};
use muster_guidance::GuidanceContext;
use muster_steps::StepContext;

/// Progress payload emitted by a running tool.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub tool_call_id: String,
    pub tool_name: String,
    pub progress: Value,
}

/// Callback through which tool progress reaches the session's event stream.
pub type ToolProgressFn = Arc<dyn Fn(ToolProgress) + Send + Sync>;

/// Everything a tool gets for one invocation: identity, guidance, the
/// session's cancel token, a durable step context, and reporting hooks.
pub struct ToolContext {
    pub session_id: SessionId,
    pub guidance: Arc<GuidanceContext>,
    /// Cooperative cancellation; long-running tools must check it.
    pub signal: CancelToken,
    pub step: StepContext,
    tool_call_id: String,
    tool_name: String,
    on_progress: Option<ToolProgressFn>,
}

impl ToolContext {
    pub fn new(
        session_id: SessionId,
        guidance: Arc<GuidanceContext>,
        signal: CancelToken,
        step: StepContext,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        on_progress: Option<ToolProgressFn>,
    ) -> Self {
        Self {
            session_id,
            guidance,
            signal,
            step,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            on_progress,
        }
    }

    /// Report intermediate progress to the session's event stream.
    pub fn emit_progress(&self, progress: Value) {
        if let Some(f) = &self.on_progress {
            f(ToolProgress {
                tool_call_id: self.tool_call_id.clone(),
                tool_name: self.tool_name.clone(),
                progress,
            });
        }
    }

    /// Log through the session's tracing scope with the tool identity
    /// attached.
    pub fn log(&self, level: tracing::Level, message: &str) {
        match level {
            tracing::Level::ERROR => {
                tracing::error!(tool = %self.tool_name, call = %self.tool_call_id, "{message}")
            }
            tracing::Level::WARN => {
                tracing::warn!(tool = %self.tool_name, call = %self.tool_call_id, "{message}")
            }
            tracing::Level::INFO => {
                tracing::info!(tool = %self.tool_name, call = %self.tool_call_id, "{message}")
            }
            tracing::Level::DEBUG => {
                tracing::debug!(tool = %self.tool_name, call = %self.tool_call_id, "{message}")
            }
            tracing::Level::TRACE => {
                tracing::trace!(tool = %self.tool_name, call = %self.tool_call_id, "{message}")
            }
        }
    }
}
