//! File-backed snapshot store.
//!
//! One UTF-8, pretty-printed JSON file per session under the store
//! directory. Filenames are the session id sanitized to `[A-Za-z0-9_-]`
//! (anything else becomes `_`) plus a `.json` suffix.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use muster_domain::{AgentCheckpoint, Error, Result, SessionId};

use crate::SnapshotStore;

pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open (and create, on first use) a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        tracing::debug!(path = %dir.display(), "snapshot store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(session_id.as_str())))
    }
}

/// Replace everything outside `[A-Za-z0-9_-]` with `_` so any session id is
/// a safe filename.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.session.id);
        let body = serde_json::to_string_pretty(checkpoint).map_err(Error::Json)?;
        tokio::fs::write(&path, body).await.map_err(Error::Io)?;
        tracing::debug!(
            session_id = %checkpoint.session.id,
            path = %path.display(),
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, session_id: &SessionId) -> Result<Option<AgentCheckpoint>> {
        let path = self.path_for(session_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        Ok(Some(serde_json::from_str(&raw).map_err(Error::Json)?))
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(Error::Io)?;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json") {
                ids.push(SessionId::from(stem));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    async fn exists(&self, session_id: &SessionId) -> Result<bool> {
        Ok(self.path_for(session_id).exists())
    }
}
