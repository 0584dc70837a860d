//! Snapshot stores — durable homes for agent checkpoints.
//!
//! One checkpoint per session id, last writer wins. The file store keeps one
//! pretty-printed JSON file per session under its directory; the memory store
//! is for tests and embedders that manage durability themselves.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use muster_domain::{AgentCheckpoint, Result, SessionId};

pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

/// Storage for session checkpoints, keyed by session id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a checkpoint, replacing any prior one for the same session.
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<()>;

    /// Load the checkpoint for a session. `None` when absent — never an
    /// error.
    async fn load(&self, session_id: &SessionId) -> Result<Option<AgentCheckpoint>>;

    /// Delete a checkpoint. Returns whether one existed.
    async fn delete(&self, session_id: &SessionId) -> Result<bool>;

    /// All session ids with a stored checkpoint.
    async fn list(&self) -> Result<Vec<SessionId>>;

    async fn exists(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.load(session_id).await?.is_some())
    }
}
