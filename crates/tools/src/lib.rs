//! Tool contract and registry.
//!
//! A tool is a named, described, JSON-schema-typed capability the model can
//! invoke. Tools execute inside a [`ToolContext`] that carries the session's
//! cancel token and a durable step context, so a tool can split its work into
//! replay-safe steps and suspend for external decisions.

pub mod context;
pub mod registry;
pub mod tool;

pub use context::{ToolContext, ToolProgress, ToolProgressFn};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolOutcome};
