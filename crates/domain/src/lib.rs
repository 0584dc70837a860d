//! Shared domain types for the Muster agent orchestrator.
//!
//! Everything that crosses a crate boundary lives here: session identifiers,
//! statuses, inputs, suspension requests and resolutions, the checkpoint
//! schema, event enums, the cancel token, and the shared error type.

pub mod cancel;
pub mod checkpoint;
pub mod error;
pub mod event;
pub mod execution;
pub mod input;
pub mod message;
pub mod status;
pub mod stream;
pub mod suspend;

pub use cancel::CancelToken;
pub use checkpoint::{AdapterSettings, AgentCheckpoint, GuidanceState, RunMetrics, SessionCheckpoint, SessionId};
pub use error::{Error, Result};
pub use event::{AgentEvent, AgentResult, CoordinatorEvent};
pub use execution::{CompletedStep, ResumeData, SuspendedStep, ToolExecutionState};
pub use input::AgentInput;
pub use message::{CheckpointMessage, Part, Role};
pub use status::{AgentStatus, CoordinatorStatus};
pub use stream::{AdapterEvent, BoxStream, MessageUpdate};
pub use suspend::{suspension_step_id, PendingRequest, PendingResolution, SuspensionKind, SuspensionRequest};
