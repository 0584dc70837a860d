//! TOML-loadable coordinator settings.
//!
//! ```toml
//! [coordinator]
//! guidance_path = "workspace/guidance"
//! skills_path = "workspace/skills"
//! snapshot_dir = "state/snapshots"
//! timezone = "Europe/Stockholm"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use muster_domain::{Error, Result};
use muster_store::{FileSnapshotStore, SnapshotStore};

use crate::coordinator::CoordinatorConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default)]
    pub coordinator: CoordinatorSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default)]
    pub guidance_path: Option<PathBuf>,
    #[serde(default)]
    pub skills_path: Option<PathBuf>,
    /// Directory for the file snapshot store; unset means no persistence.
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl RuntimeSettings {
    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        Self::parse(&raw)
    }

    /// Build a [`CoordinatorConfig`], opening the snapshot directory when one
    /// is configured. Injectors are code, not configuration; attach them on
    /// the returned value.
    pub fn into_coordinator_config(self) -> Result<CoordinatorConfig> {
        let snapshot_store = match self.coordinator.snapshot_dir {
            Some(dir) => {
                Some(Arc::new(FileSnapshotStore::new(dir)?) as Arc<dyn SnapshotStore>)
            }
            None => None,
        };
        Ok(CoordinatorConfig {
            snapshot_store,
            default_guidance_path: self.coordinator.guidance_path,
            injectors: None,
            timezone: self.coordinator.timezone,
            skills_path: self.coordinator.skills_path,
        })
    }
}
