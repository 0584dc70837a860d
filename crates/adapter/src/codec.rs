//! Message codec — checkpoint schema ↔ adapter-native schema.
//!
//! The native schema is what a streaming backend actually records: system,
//! user and assistant messages built from content blocks, with tool results
//! travelling as blocks inside user messages. Checkpoints flatten that into
//! the provider-agnostic schema where tool results are their own role.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use muster_domain::message::{CheckpointMessage, Part, Role};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Native schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeRole {
    System,
    User,
    Assistant,
}

/// One content block of a native message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NativeBlock {
    Text { text: String },
    Thinking { text: String },
    Image { media_type: String, data: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

/// A message in the backend's native transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeMessage {
    pub role: NativeRole,
    pub content: Vec<NativeBlock>,
    /// Why the model stopped producing this message (assistant only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl NativeMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: NativeRole::System,
            content: vec![NativeBlock::Text { text: text.into() }],
            stop_reason: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: NativeRole::User,
            content: vec![NativeBlock::Text { text: text.into() }],
            stop_reason: None,
        }
    }

    pub fn assistant(content: Vec<NativeBlock>, stop_reason: Option<String>) -> Self {
        Self {
            role: NativeRole::Assistant,
            content,
            stop_reason,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: NativeRole::User,
            content: vec![NativeBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                tool_name: tool_name.into(),
                content: content.into(),
                is_error,
            }],
            stop_reason: None,
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let NativeBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Codec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transform between the checkpoint message schema and the native schema.
pub trait MessageCodec: Send + Sync {
    /// Checkpoint messages → native transcript (for restore).
    fn encode(&self, messages: &[CheckpointMessage]) -> Vec<NativeMessage>;

    /// Native transcript → checkpoint messages (for checkpointing). System
    /// messages are rebuilt from guidance on restore, so they are skipped.
    fn decode(&self, messages: &[NativeMessage]) -> Vec<CheckpointMessage>;
}

/// The codec for the built-in native schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCodec;

impl MessageCodec for NativeCodec {
    fn encode(&self, messages: &[CheckpointMessage]) -> Vec<NativeMessage> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::User => out.push(NativeMessage {
                    role: NativeRole::User,
                    content: msg.content.iter().filter_map(encode_part).collect(),
                    stop_reason: None,
                }),
                Role::Assistant => out.push(NativeMessage {
                    role: NativeRole::Assistant,
                    content: msg.content.iter().filter_map(encode_part).collect(),
                    stop_reason: None,
                }),
                Role::ToolResult => {
                    let text = msg.text();
                    out.push(NativeMessage::tool_result(
                        msg.tool_call_id.clone().unwrap_or_default(),
                        msg.tool_name.clone().unwrap_or_default(),
                        text,
                        msg.is_error.unwrap_or(false),
                    ));
                }
            }
        }
        out
    }

    fn decode(&self, messages: &[NativeMessage]) -> Vec<CheckpointMessage> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                NativeRole::System => continue,
                NativeRole::Assistant => {
                    out.push(CheckpointMessage::assistant(
                        msg.content.iter().filter_map(decode_part).collect(),
                    ));
                }
                NativeRole::User => {
                    // Tool results become their own checkpoint messages; any
                    // remaining content stays a user message.
                    let mut user_parts = Vec::new();
                    for block in &msg.content {
                        match block {
                            NativeBlock::ToolResult {
                                tool_use_id,
                                tool_name,
                                content,
                                is_error,
                            } => out.push(CheckpointMessage::tool_result(
                                tool_use_id.clone(),
                                tool_name.clone(),
                                vec![Part::Text { text: content.clone() }],
                                *is_error,
                            )),
                            other => {
                                if let Some(part) = decode_part(other) {
                                    user_parts.push(part);
                                }
                            }
                        }
                    }
                    if !user_parts.is_empty() {
                        let mut user = CheckpointMessage::user("");
                        user.content = user_parts;
                        out.push(user);
                    }
                }
            }
        }
        out
    }
}

fn encode_part(part: &Part) -> Option<NativeBlock> {
    match part {
        Part::Text { text } => Some(NativeBlock::Text { text: text.clone() }),
        Part::Thinking { text } => Some(NativeBlock::Thinking { text: text.clone() }),
        Part::Image { media_type, data } => Some(NativeBlock::Image {
            media_type: media_type.clone(),
            data: data.clone(),
        }),
        Part::ToolUse { id, name, input } => Some(NativeBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        }),
    }
}

fn decode_part(block: &NativeBlock) -> Option<Part> {
    match block {
        NativeBlock::Text { text } => Some(Part::Text { text: text.clone() }),
        NativeBlock::Thinking { text } => Some(Part::Thinking { text: text.clone() }),
        NativeBlock::Image { media_type, data } => Some(Part::Image {
            media_type: media_type.clone(),
            data: data.clone(),
        }),
        NativeBlock::ToolUse { id, name, input } => Some(Part::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        }),
        NativeBlock::ToolResult { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_assistant_round_trip() {
        let messages = vec![
            CheckpointMessage::user("question"),
            CheckpointMessage::assistant(vec![
                Part::Thinking { text: "let me see".into() },
                Part::Text { text: "answer".into() },
            ]),
        ];

        let codec = NativeCodec;
        let native = codec.encode(&messages);
        assert_eq!(native.len(), 2);
        assert_eq!(native[0].role, NativeRole::User);
        assert_eq!(native[1].role, NativeRole::Assistant);

        let back = codec.decode(&native);
        assert_eq!(back.len(), 2);
        assert!(back[0].same_content(&messages[0]));
        assert!(back[1].same_content(&messages[1]));
    }

    #[test]
    fn tool_results_travel_as_user_blocks() {
        let messages = vec![
            CheckpointMessage::assistant(vec![Part::ToolUse {
                id: "tc_1".into(),
                name: "echo".into(),
                input: serde_json::json!({"x": 1}),
            }]),
            CheckpointMessage::tool_result(
                "tc_1",
                "echo",
                vec![Part::Text { text: "{\"x\":1}".into() }],
                false,
            ),
        ];

        let codec = NativeCodec;
        let native = codec.encode(&messages);
        assert_eq!(native[1].role, NativeRole::User);
        assert!(matches!(
            &native[1].content[0],
            NativeBlock::ToolResult { tool_use_id, .. } if tool_use_id == "tc_1"
        ));

        let back = codec.decode(&native);
        assert_eq!(back.len(), 2);
        assert!(back[0].same_content(&messages[0]));
        assert!(back[1].same_content(&messages[1]));
    }

    #[test]
    fn decode_skips_system_messages() {
        let native = vec![
            NativeMessage::system("You are helpful."),
            NativeMessage::user("hi"),
        ];
        let decoded = NativeCodec.decode(&native);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].role, Role::User);
    }

    #[test]
    fn decode_splits_mixed_user_message() {
        let native = vec![NativeMessage {
            role: NativeRole::User,
            content: vec![
                NativeBlock::ToolResult {
                    tool_use_id: "tc_1".into(),
                    tool_name: "echo".into(),
                    content: "ok".into(),
                    is_error: false,
                },
                NativeBlock::Text { text: "and also".into() },
            ],
            stop_reason: None,
        }];

        let decoded = NativeCodec.decode(&native);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].role, Role::ToolResult);
        assert_eq!(decoded[1].role, Role::User);
        assert_eq!(decoded[1].text(), "and also");
    }

    #[test]
    fn native_text_helper() {
        let msg = NativeMessage::assistant(
            vec![
                NativeBlock::Text { text: "a".into() },
                NativeBlock::Thinking { text: "x".into() },
                NativeBlock::Text { text: "b".into() },
            ],
            Some("end_turn".into()),
        );
        assert_eq!(msg.text(), "ab");
        assert_eq!(msg.stop_reason.as_deref(), Some("end_turn"));
    }
}
