//! Guidance bundle loading and system-prompt assembly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use muster_domain::checkpoint::GuidanceState;

/// Per-file cap applied when a guidance file is injected into the prompt.
const MAX_FILE_CHARS: usize = 64 * 1024;

/// A loaded guidance bundle: every top-level `*.md` file under one root.
///
/// File contents are cached privately in this context; two contexts for the
/// same root never share cache state.
pub struct GuidanceContext {
    root: PathBuf,
    cache: RwLock<BTreeMap<String, String>>,
    memory_writes: Mutex<Vec<String>>,
    system_state: Mutex<BTreeMap<String, Value>>,
}

impl GuidanceContext {
    /// Load the bundle rooted at `root`. A missing directory yields an empty
    /// bundle with a warning; sessions can still run without guidance files.
    pub fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut cache = BTreeMap::new();

        match std::fs::read_dir(&root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    match std::fs::read_to_string(&path) {
                        Ok(content) => {
                            cache.insert(name.to_owned(), content);
                        }
                        Err(e) => {
                            tracing::warn!(
                                path = %path.display(),
                                error = %e,
                                "failed to read guidance file"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %root.display(),
                    error = %e,
                    "guidance root not readable; using empty bundle"
                );
            }
        }

        tracing::debug!(
            path = %root.display(),
            files = cache.len(),
            "guidance bundle loaded"
        );

        Self {
            root,
            cache: RwLock::new(cache),
            memory_writes: Mutex::new(Vec::new()),
            system_state: Mutex::new(BTreeMap::new()),
        }
    }

    /// An empty bundle with no backing directory. Useful for tests and
    /// embedders that inject all context through injectors.
    pub fn empty() -> Self {
        Self {
            root: PathBuf::new(),
            cache: RwLock::new(BTreeMap::new()),
            memory_writes: Mutex::new(Vec::new()),
            system_state: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// One cached file by name.
    pub fn file(&self, name: &str) -> Option<String> {
        self.cache.read().get(name).cloned()
    }

    /// Names of all loaded files, sorted.
    pub fn file_names(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    /// Assemble the bundle into a system-prompt string, one delimited section
    /// per file in name order. Empty when the bundle has no files.
    pub fn system_prompt(&self) -> String {
        let cache = self.cache.read();
        let mut out = String::new();
        for (name, content) in cache.iter() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format_section(name, content));
        }
        out
    }

    /// Record a memory write performed during the session; carried through
    /// checkpoints.
    pub fn record_memory_write(&self, entry: impl Into<String>) {
        self.memory_writes.lock().push(entry.into());
    }

    /// Set a system-state value carried through checkpoints.
    pub fn set_system_state(&self, key: impl Into<String>, value: Value) {
        self.system_state.lock().insert(key.into(), value);
    }

    /// The checkpointable guidance state.
    pub fn state(&self) -> GuidanceState {
        GuidanceState {
            guidance_path: self.root.to_string_lossy().into_owned(),
            memory_writes: self.memory_writes.lock().clone(),
            system_state: self.system_state.lock().clone(),
        }
    }

    /// Restore checkpointed writes and state into this context.
    pub fn restore_state(&self, state: &GuidanceState) {
        *self.memory_writes.lock() = state.memory_writes.clone();
        *self.system_state.lock() = state.system_state.clone();
    }
}

/// Format one guidance file with machine-inspectable delimiters.
fn format_section(name: &str, content: &str) -> String {
    let truncated = content.len() > MAX_FILE_CHARS;
    let body = if truncated {
        let mut end = MAX_FILE_CHARS;
        while !content.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        &content[..end]
    } else {
        content
    };
    format!(
        "\
=== GUIDANCE_FILE: {name} ===
TRUNCATED: {truncated}
--- BEGIN ---
{body}
--- END ---
"
    )
}
