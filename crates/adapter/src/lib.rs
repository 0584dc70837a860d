//! The model-and-tooling boundary.
//!
//! An [`AgentAdapter`] creates and restores [`AgentInstance`]s — the per-agent
//! state machines the coordinator supervises. Underneath an instance sits a
//! [`ModelStream`]: the raw streaming backend that produces model events and
//! records the native transcript. The [`codec`] module converts between the
//! native transcript and the provider-agnostic checkpoint schema, and
//! [`scripted`] provides the deterministic in-memory backend used by tests.

pub mod codec;
pub mod scripted;
pub mod traits;

pub use codec::{MessageCodec, NativeBlock, NativeCodec, NativeMessage, NativeRole};
pub use scripted::ScriptedModel;
pub use traits::{
    AdapterCreateConfig, AgentAdapter, AgentInstance, AgentLimits, ContextInjection, ModelEvent,
    ModelStream, StopInfo,
};
