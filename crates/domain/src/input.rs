use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Input to a session turn: a user message, extra context, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, Value>>,
}

impl AgentInput {
    /// Input consisting of a single user message.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            context: None,
        }
    }

    /// True when neither a message nor context is present.
    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.context.as_ref().map_or(true, |c| c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructor() {
        let input = AgentInput::message("hello");
        assert_eq!(input.message.as_deref(), Some("hello"));
        assert!(input.context.is_none());
        assert!(!input.is_empty());
    }

    #[test]
    fn default_is_empty() {
        assert!(AgentInput::default().is_empty());
    }

    #[test]
    fn context_only_is_not_empty() {
        let mut ctx = BTreeMap::new();
        ctx.insert("ticket".into(), serde_json::json!("T-42"));
        let input = AgentInput {
            message: None,
            context: Some(ctx),
        };
        assert!(!input.is_empty());
    }

    #[test]
    fn empty_context_map_counts_as_empty() {
        let input = AgentInput {
            message: None,
            context: Some(BTreeMap::new()),
        };
        assert!(input.is_empty());
    }
}
