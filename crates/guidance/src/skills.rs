//! Skill discovery.
//!
//! Skills are markdown files with optional YAML frontmatter:
//!
//! ```markdown
//! ---
//! name: release-notes
//! description: Draft release notes from merged changes.
//! ---
//!
//! Instructions for the skill body…
//! ```
//!
//! Missing frontmatter fields are synthesized: the name from the filename
//! stem, the description from the first non-empty body line. Unparseable or
//! oversized files are skipped with a warning.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Skill files larger than this are skipped.
const MAX_SKILL_FILE_BYTES: u64 = 256 * 1024;

/// One discovered skill.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    pub name: String,
    pub description: String,
    /// Markdown body after the frontmatter fence.
    pub content: String,
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct SkillFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// All skills discovered under one root, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct SkillSet {
    skills: Vec<SkillInfo>,
}

impl SkillSet {
    /// Recursively discover `*.md` skills under `root`. A missing root yields
    /// an empty set with a warning.
    pub fn load(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let mut skills = Vec::new();
        collect_skills(root, &mut skills);
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!(path = %root.display(), skills = skills.len(), "skills loaded");
        Self { skills }
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillInfo> {
        self.skills.iter()
    }

    pub fn find(&self, name: &str) -> Option<&SkillInfo> {
        self.skills.iter().find(|s| s.name == name)
    }

    /// Compact one-line-per-skill index for prompt injection. Empty string
    /// when no skills exist.
    pub fn render_index(&self) -> String {
        if self.skills.is_empty() {
            return String::new();
        }
        let mut out = String::from("=== SKILLS_INDEX ===\n");
        for skill in &self.skills {
            out.push_str(&format!("- {}: {}\n", skill.name, skill.description));
        }
        out.push_str("=== END_SKILLS_INDEX ===\n");
        out
    }
}

fn collect_skills(dir: &Path, out: &mut Vec<SkillInfo>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "skills directory not readable");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_skills(&path, out);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        if let Some(skill) = try_load_skill(&path) {
            out.push(skill);
        }
    }
}

fn try_load_skill(path: &Path) -> Option<SkillInfo> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_SKILL_FILE_BYTES {
        warn!(path = %path.display(), size, "skipping oversized skill file");
        return None;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read skill file");
            return None;
        }
    };
    if raw.trim().is_empty() {
        return None;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("skill");
    parse_skill(&raw, stem, path)
}

fn parse_skill(raw: &str, stem: &str, path: &Path) -> Option<SkillInfo> {
    let rest = raw.trim_start_matches('\n');

    let (fm, body) = if let Some(after_open) = rest.strip_prefix("---") {
        let close = after_open.find("\n---")?;
        let yaml = &after_open[..close];
        let body = after_open[close + 4..].trim_start_matches('\n').to_owned();
        let fm: SkillFrontmatter = match serde_yaml::from_str(yaml) {
            Ok(fm) => fm,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid skill frontmatter; skipping");
                return None;
            }
        };
        (fm, body)
    } else {
        (SkillFrontmatter::default(), rest.to_owned())
    };

    let name = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| stem.to_owned());

    let description = fm
        .description
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| {
            body.lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or(stem)
                .trim_start_matches('#')
                .trim()
                .to_owned()
        });

    if description.is_empty() {
        return None;
    }

    Some(SkillInfo {
        name,
        description,
        content: body,
        path: path.to_path_buf(),
    })
}
