//! Provider-agnostic checkpoint messages.
//!
//! The checkpoint schema is the common currency between adapters: whatever a
//! backend speaks natively, its transcript is persisted as a flat list of
//! [`CheckpointMessage`]s and translated back through the adapter's codec on
//! restore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in the checkpoint schema.
///
/// Tool results are their own role rather than a content detail, so a
/// checkpoint can be scanned for tool activity without parsing parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// One content part of a checkpoint message.
///
/// Only `assistant` messages carry `thinking` and `tool_use` parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    Image { media_type: String, data: String },
    Thinking { text: String },
    ToolUse { id: String, name: String, input: Value },
}

/// A single message in a session checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMessage {
    pub role: Role,
    pub content: Vec<Part>,
    pub timestamp: DateTime<Utc>,
    /// Set only on `tool_result` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CheckpointMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![Part::Text { text: text.into() }],
            timestamp: Utc::now(),
            tool_call_id: None,
            tool_name: None,
            is_error: None,
            provider: None,
            model: None,
        }
    }

    pub fn assistant(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Assistant,
            content: parts,
            timestamp: Utc::now(),
            tool_call_id: None,
            tool_name: None,
            is_error: None,
            provider: None,
            model: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<Part>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::ToolResult,
            content,
            timestamp: Utc::now(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            is_error: Some(is_error),
            provider: None,
            model: None,
        }
    }

    /// Concatenated text of all `text` parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if let Part::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// All `tool_use` parts as `(id, name, input)` triples.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|p| match p {
                Part::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
                _ => None,
            })
            .collect()
    }

    /// Structural equality ignoring timestamps and provider tags.
    pub fn same_content(&self, other: &Self) -> bool {
        self.role == other.role
            && self.content == other.content
            && self.tool_call_id == other.tool_call_id
            && self.tool_name == other.tool_name
            && self.is_error == other.is_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_single_text_part() {
        let msg = CheckpointMessage::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text(), "hello");
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn tool_result_carries_call_metadata() {
        let msg = CheckpointMessage::tool_result(
            "tc_1",
            "echo",
            vec![Part::Text { text: "ok".into() }],
            false,
        );
        assert_eq!(msg.role, Role::ToolResult);
        assert_eq!(msg.tool_call_id.as_deref(), Some("tc_1"));
        assert_eq!(msg.tool_name.as_deref(), Some("echo"));
        assert_eq!(msg.is_error, Some(false));
    }

    #[test]
    fn text_concatenates_only_text_parts() {
        let msg = CheckpointMessage::assistant(vec![
            Part::Thinking { text: "hmm".into() },
            Part::Text { text: "a".into() },
            Part::ToolUse {
                id: "tc_1".into(),
                name: "echo".into(),
                input: Value::Null,
            },
            Part::Text { text: "b".into() },
        ]);
        assert_eq!(msg.text(), "ab");
        assert_eq!(msg.tool_uses().len(), 1);
    }

    #[test]
    fn part_tagged_serialization() {
        let part = Part::ToolUse {
            id: "tc_1".into(),
            name: "echo".into(),
            input: serde_json::json!({"x": 1}),
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "echo");
    }

    #[test]
    fn same_content_ignores_timestamp() {
        let a = CheckpointMessage::user("hi");
        let mut b = CheckpointMessage::user("hi");
        b.timestamp = b.timestamp + chrono::Duration::seconds(5);
        assert!(a.same_content(&b));
    }
}
