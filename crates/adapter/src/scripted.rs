//! Deterministic in-memory model backend.
//!
//! `ScriptedModel` replays a pre-programmed sequence of model rounds and
//! records a native transcript exactly like a live backend would. Two
//! behaviors make it a faithful stand-in for suspension and restore testing:
//! tool calls left unanswered in the transcript are re-emitted before any new
//! scripted round, and the stop reason of the last scripted round is
//! inspectable through `stop_info`.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use muster_domain::stream::BoxStream;
use muster_domain::Result;

use crate::codec::{NativeBlock, NativeMessage, NativeRole};
use crate::traits::{ModelEvent, ModelStream, StopInfo};

/// One scripted model round: the events streamed for a single `stream_turn`.
pub type ScriptedRound = Vec<ModelEvent>;

pub struct ScriptedModel {
    state: Mutex<ScriptedState>,
    aborted: Arc<AtomicBool>,
}

struct ScriptedState {
    rounds: VecDeque<ScriptedRound>,
    messages: Vec<NativeMessage>,
}

impl ScriptedModel {
    pub fn new(rounds: Vec<ScriptedRound>) -> Self {
        Self::with_transcript(Vec::new(), rounds)
    }

    /// Build with a pre-seeded transcript (the restore path).
    pub fn with_transcript(messages: Vec<NativeMessage>, rounds: Vec<ScriptedRound>) -> Self {
        Self {
            state: Mutex::new(ScriptedState {
                rounds: rounds.into(),
                messages,
            }),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A round producing streamed text and a normal end.
    pub fn text_round(text: &str) -> ScriptedRound {
        vec![
            ModelEvent::TextDelta { text: text.to_owned() },
            ModelEvent::TextEnd,
            ModelEvent::End { stop_reason: Some("end_turn".into()) },
        ]
    }

    /// A round requesting a single tool call.
    pub fn tool_round(id: &str, name: &str, input: Value) -> ScriptedRound {
        vec![
            ModelEvent::ToolUse {
                id: id.to_owned(),
                name: name.to_owned(),
                input,
            },
            ModelEvent::End { stop_reason: Some("tool_use".into()) },
        ]
    }

    /// A round that ends with the backend reporting a terminal error.
    pub fn error_round(message: &str) -> ScriptedRound {
        vec![
            ModelEvent::TextDelta { text: message.to_owned() },
            ModelEvent::TextEnd,
            ModelEvent::End { stop_reason: Some("error".into()) },
        ]
    }

    /// Tool uses recorded in the transcript that have no matching result yet,
    /// in transcript order.
    fn unanswered_tool_uses(messages: &[NativeMessage]) -> Vec<(String, String, Value)> {
        let answered: HashSet<&str> = messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|b| match b {
                NativeBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect();

        messages
            .iter()
            .filter(|m| m.role == NativeRole::Assistant)
            .flat_map(|m| m.content.iter())
            .filter_map(|b| match b {
                NativeBlock::ToolUse { id, name, input } if !answered.contains(id.as_str()) => {
                    Some((id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Fold one round's events into the assistant message it produces.
    fn record_round(round: &[ModelEvent]) -> NativeMessage {
        let mut blocks = Vec::new();
        let mut text = String::new();
        let mut thinking = String::new();
        let mut stop_reason = None;

        for event in round {
            match event {
                ModelEvent::TextDelta { text: t } => text.push_str(t),
                ModelEvent::TextEnd => {
                    if !text.is_empty() {
                        blocks.push(NativeBlock::Text { text: std::mem::take(&mut text) });
                    }
                }
                ModelEvent::ThinkingDelta { text: t } => thinking.push_str(t),
                ModelEvent::ToolUse { id, name, input } => {
                    blocks.push(NativeBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    });
                }
                ModelEvent::End { stop_reason: sr } => stop_reason = sr.clone(),
            }
        }
        if !thinking.is_empty() {
            blocks.insert(0, NativeBlock::Thinking { text: thinking });
        }
        if !text.is_empty() {
            blocks.push(NativeBlock::Text { text });
        }

        NativeMessage::assistant(blocks, stop_reason)
    }
}

#[async_trait]
impl ModelStream for ScriptedModel {
    async fn stream_turn(&self) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let events: Vec<ModelEvent> = {
            let mut state = self.state.lock();

            let unanswered = Self::unanswered_tool_uses(&state.messages);
            if !unanswered.is_empty() {
                // Replay the pending tool calls; the assistant message that
                // requested them is already in the transcript.
                tracing::debug!(count = unanswered.len(), "replaying unanswered tool calls");
                let mut events: Vec<ModelEvent> = unanswered
                    .into_iter()
                    .map(|(id, name, input)| ModelEvent::ToolUse { id, name, input })
                    .collect();
                events.push(ModelEvent::End { stop_reason: Some("tool_use".into()) });
                events
            } else if let Some(round) = state.rounds.pop_front() {
                let message = Self::record_round(&round);
                state.messages.push(message);
                round
            } else {
                // Script exhausted: a silent final round.
                vec![ModelEvent::End { stop_reason: Some("end_turn".into()) }]
            }
        };

        let aborted = self.aborted.clone();
        Ok(Box::pin(stream! {
            for event in events {
                if aborted.load(Ordering::Acquire) {
                    break;
                }
                yield Ok(event);
            }
        }))
    }

    fn push_user(&self, text: &str) {
        self.state.lock().messages.push(NativeMessage::user(text));
    }

    fn push_tool_result(&self, tool_call_id: &str, tool_name: &str, content: &str, is_error: bool) {
        self.state
            .lock()
            .messages
            .push(NativeMessage::tool_result(tool_call_id, tool_name, content, is_error));
    }

    fn steer(&self, text: &str) {
        // Steered messages join the transcript immediately; the next round
        // sees them like any other user message.
        self.push_user(text);
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn messages(&self) -> Vec<NativeMessage> {
        self.state.lock().messages.clone()
    }

    fn stop_info(&self) -> Option<StopInfo> {
        let state = self.state.lock();
        let last = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == NativeRole::Assistant)?;
        Some(StopInfo {
            stop_reason: last.stop_reason.clone(),
            error: if last.stop_reason.as_deref() == Some("error") {
                Some(last.text())
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    async fn collect(model: &ScriptedModel) -> Vec<ModelEvent> {
        let mut stream = model.stream_turn().await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn streams_rounds_in_order_and_records_transcript() {
        let model = ScriptedModel::new(vec![ScriptedModel::text_round("hi")]);
        model.push_user("hello");

        let events = collect(&model).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ModelEvent::TextDelta { text } if text == "hi"));

        let messages = model.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, NativeRole::User);
        assert_eq!(messages[1].role, NativeRole::Assistant);
        assert_eq!(messages[1].text(), "hi");
    }

    #[tokio::test]
    async fn exhausted_script_yields_silent_round() {
        let model = ScriptedModel::new(vec![]);
        let events = collect(&model).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ModelEvent::End { .. }));
    }

    #[tokio::test]
    async fn unanswered_tool_calls_are_replayed() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::tool_round("tc_1", "echo", serde_json::json!({"x": 1})),
            ScriptedModel::text_round("done"),
        ]);

        // First round requests the tool.
        let events = collect(&model).await;
        assert!(matches!(&events[0], ModelEvent::ToolUse { id, .. } if id == "tc_1"));

        // No result pushed: the next round replays the same tool call instead
        // of advancing the script.
        let events = collect(&model).await;
        assert!(matches!(&events[0], ModelEvent::ToolUse { id, .. } if id == "tc_1"));

        // After the result arrives the script advances.
        model.push_tool_result("tc_1", "echo", "{\"x\":1}", false);
        let events = collect(&model).await;
        assert!(matches!(&events[0], ModelEvent::TextDelta { text } if text == "done"));
    }

    #[tokio::test]
    async fn restore_seeded_transcript_replays_unanswered_calls() {
        let transcript = vec![
            NativeMessage::user("do it"),
            NativeMessage::assistant(
                vec![NativeBlock::ToolUse {
                    id: "tc_9".into(),
                    name: "rm".into(),
                    input: serde_json::json!({"path": "/x"}),
                }],
                Some("tool_use".into()),
            ),
        ];
        let model = ScriptedModel::with_transcript(transcript, vec![]);

        let events = collect(&model).await;
        assert!(matches!(&events[0], ModelEvent::ToolUse { id, .. } if id == "tc_9"));
    }

    #[tokio::test]
    async fn abort_cuts_the_stream() {
        let model = ScriptedModel::new(vec![ScriptedModel::text_round("long answer")]);
        model.abort();
        let events = collect(&model).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn stop_info_reports_error_round() {
        let model = ScriptedModel::new(vec![ScriptedModel::error_round("model exploded")]);
        let _ = collect(&model).await;

        let stop = model.stop_info().unwrap();
        assert!(stop.is_error());
        assert_eq!(stop.error.as_deref(), Some("model exploded"));
    }

    #[tokio::test]
    async fn stop_info_none_without_assistant_message() {
        let model = ScriptedModel::new(vec![]);
        model.push_user("hi");
        assert!(model.stop_info().is_none());
    }

    #[test]
    fn record_round_orders_thinking_first() {
        let round = vec![
            ModelEvent::TextDelta { text: "a".into() },
            ModelEvent::ThinkingDelta { text: "t".into() },
            ModelEvent::TextEnd,
            ModelEvent::End { stop_reason: Some("end_turn".into()) },
        ];
        let msg = ScriptedModel::record_round(&round);
        assert!(matches!(&msg.content[0], NativeBlock::Thinking { text } if text == "t"));
        assert_eq!(msg.text(), "a");
    }
}
