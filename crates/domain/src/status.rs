use serde::{Deserialize, Serialize};

/// Lifecycle status of one agent session.
///
/// Only `Completed`, `Failed`, `Terminated` and `Aborted` are terminal; a
/// session that reaches a terminal status never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Running,
    Waiting,
    Paused,
    Completing,
    Completed,
    Failed,
    Terminated,
    Aborted,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Terminated | Self::Aborted
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of the coordinator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for CoordinatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(AgentStatus::Terminated.is_terminal());
        assert!(AgentStatus::Aborted.is_terminal());
    }

    #[test]
    fn non_terminal_statuses() {
        assert!(!AgentStatus::Initializing.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
        assert!(!AgentStatus::Waiting.is_terminal());
        assert!(!AgentStatus::Paused.is_terminal());
        assert!(!AgentStatus::Completing.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&AgentStatus::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");
        let back: AgentStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(back, AgentStatus::Completed);
    }

    #[test]
    fn display_matches_serde() {
        assert_eq!(AgentStatus::Initializing.to_string(), "initializing");
        assert_eq!(CoordinatorStatus::Stopping.to_string(), "stopping");
    }
}
