use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use crate::suspend::PendingRequest;

/// A boxed async stream, used for model streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Message-update payloads inside an [`AdapterEvent::MessageUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageUpdate {
    TextDelta { text: String },
    TextEnd,
    ThinkingDelta { text: String },
}

/// Events produced by an instance's prompt machinery (model streaming plus
/// tool dispatch), consumed by the session run loop and translated into core
/// [`AgentEvent`](crate::event::AgentEvent)s.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterEvent {
    /// The prompt turn started.
    AgentStart,

    /// Streaming content from the model.
    MessageUpdate { update: MessageUpdate },

    /// A tool invocation started.
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },

    /// Intermediate progress from a running tool (including step events).
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        progress: Value,
    },

    /// A tool invocation finished.
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One full turn (model rounds plus tools) completed.
    TurnEnd,

    /// The prompt turn finished; no further events will follow this run.
    AgentEnd,

    /// A tool suspended; the session should surface the pending requests.
    SuspensionRaised { requests: Vec<PendingRequest> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_events_serialize_tagged() {
        let ev = AdapterEvent::MessageUpdate {
            update: MessageUpdate::TextDelta { text: "hi".into() },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "message_update");
        assert_eq!(json["update"]["type"], "text_delta");
    }

    #[test]
    fn turn_end_is_unit_shaped() {
        let json = serde_json::to_value(AdapterEvent::TurnEnd).unwrap();
        assert_eq!(json["type"], "turn_end");
    }
}
