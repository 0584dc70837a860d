//! Durable tool execution.
//!
//! A tool that may outlive a single process run splits its work into named
//! steps. Each step runs exactly once: its result is recorded, and any replay
//! of the tool returns the recorded value instead of re-executing. Steps that
//! need an external decision raise a typed suspension that unwinds the tool;
//! the answer arrives later as a resolution and the tool replays from the
//! start, with every finished step served from the record.

pub mod step;
pub mod tracker;

pub use step::{StepContext, StepError, StepEvent, StepEventFn, StepResult, SuspendedSignal};
pub use tracker::ToolTracker;
