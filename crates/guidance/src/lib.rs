//! Guidance bundles and skills.
//!
//! Guidance is the read-only markdown a session is launched with: the files
//! under a guidance root become the system prompt, and the skills under a
//! skills root become a compact index the model can reference. Loaders cache
//! privately per context; nothing here writes to disk.

pub mod context;
pub mod skills;

pub use context::GuidanceContext;
pub use skills::{SkillInfo, SkillSet};
