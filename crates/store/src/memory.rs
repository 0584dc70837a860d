//! In-memory snapshot store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use muster_domain::{AgentCheckpoint, Result, SessionId};

use crate::SnapshotStore;

/// Checkpoints held in a process-local map.
///
/// Checkpoints are cloned on both save and load so callers can never mutate
/// stored state through a retained reference.
#[derive(Default)]
pub struct MemorySnapshotStore {
    checkpoints: RwLock<HashMap<SessionId, AgentCheckpoint>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<()> {
        self.checkpoints
            .write()
            .insert(checkpoint.session.id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<AgentCheckpoint>> {
        Ok(self.checkpoints.read().get(session_id).cloned())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.checkpoints.write().remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let mut ids: Vec<SessionId> = self.checkpoints.read().keys().cloned().collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    async fn exists(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.checkpoints.read().contains_key(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muster_domain::checkpoint::{AdapterSettings, GuidanceState, RunMetrics, SessionCheckpoint};
    use muster_domain::CheckpointMessage;

    fn checkpoint(id: &str) -> AgentCheckpoint {
        AgentCheckpoint {
            timestamp: Utc::now(),
            adapter_name: "scripted".into(),
            session: SessionCheckpoint {
                id: id.into(),
                parent_id: None,
                created_at: Utc::now(),
                tags: Vec::new(),
                metadata: Default::default(),
                task: None,
                metrics: RunMetrics::default(),
            },
            guidance: GuidanceState::default(),
            messages: vec![CheckpointMessage::user("hi")],
            adapter_config: AdapterSettings::default(),
            tool_executions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let store = MemorySnapshotStore::new();
        let cp = checkpoint("s1");
        store.save(&cp).await.unwrap();

        let loaded = store.load(&"s1".into()).await.unwrap().unwrap();
        assert!(loaded.same_core(&cp));
        assert!(store.exists(&"s1".into()).await.unwrap());
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = MemorySnapshotStore::new();
        assert!(store.load(&"ghost".into()).await.unwrap().is_none());
        assert!(!store.exists(&"ghost".into()).await.unwrap());
    }

    #[tokio::test]
    async fn save_overwrites_same_key() {
        let store = MemorySnapshotStore::new();
        store.save(&checkpoint("s1")).await.unwrap();

        let mut second = checkpoint("s1");
        second.messages.push(CheckpointMessage::user("again"));
        store.save(&second).await.unwrap();

        let loaded = store.load(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stored_copy_is_isolated_from_caller_mutation() {
        let store = MemorySnapshotStore::new();
        let mut cp = checkpoint("s1");
        store.save(&cp).await.unwrap();

        // Mutating the caller's copy must not affect the stored one.
        cp.messages.clear();
        let loaded = store.load(&"s1".into()).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn delete_and_list() {
        let store = MemorySnapshotStore::new();
        store.save(&checkpoint("b")).await.unwrap();
        store.save(&checkpoint("a")).await.unwrap();

        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec![SessionId::from("a"), SessionId::from("b")]);

        assert!(store.delete(&"a".into()).await.unwrap());
        assert!(!store.delete(&"a".into()).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
