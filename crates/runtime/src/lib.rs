//! The Muster core: coordinator, session runtime, and event plumbing.
//!
//! The [`Coordinator`] multiplexes many concurrent agent sessions: it spawns
//! and restores them through an [`AgentAdapter`](muster_adapter::AgentAdapter),
//! re-emits their events on one multiplexed bus, persists a checkpoint on
//! every terminal event, and shuts them down gracefully. Each session is a
//! [`SessionRuntime`] driven through an [`AgentHandle`].

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod handle;
pub mod injector;
pub mod scripted;
pub mod session;

pub use bus::{EventBus, EventStream, Subscription};
pub use config::RuntimeSettings;
pub use coordinator::{
    ContinueConfig, Coordinator, CoordinatorConfig, SessionFilter, ShutdownOptions, SpawnConfig,
};
pub use handle::AgentHandle;
pub use injector::{ContextInjector, ContextInjectorRegistry, InjectionContext};
pub use scripted::ScriptedAdapter;
pub use session::{SessionParams, SessionRuntime};
