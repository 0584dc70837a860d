//! Coordinator — the multiplexer for many concurrent agent sessions.
//!
//! Owns the session table, re-emits every session event on one bus, persists
//! a checkpoint whenever a session reaches its terminal event, and implements
//! spawn, continue and graceful shutdown.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;

use muster_adapter::traits::{AdapterCreateConfig, AgentAdapter, AgentLimits, ContextInjection};
use muster_domain::{
    AgentCheckpoint, AgentEvent, AgentInput, AgentStatus, CoordinatorEvent, CoordinatorStatus,
    Error, Result, SessionId,
};
use muster_guidance::{GuidanceContext, SkillSet};
use muster_store::SnapshotStore;
use muster_tools::ToolRegistry;

use crate::bus::{EventBus, EventStream, Subscription};
use crate::handle::AgentHandle;
use crate::injector::{ContextInjectorRegistry, InjectionContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Construction-time configuration for a [`Coordinator`].
#[derive(Default)]
pub struct CoordinatorConfig {
    pub snapshot_store: Option<Arc<dyn SnapshotStore>>,
    pub default_guidance_path: Option<PathBuf>,
    pub injectors: Option<Arc<ContextInjectorRegistry>>,
    /// IANA timezone name. Defaults to UTC.
    pub timezone: Option<String>,
    pub skills_path: Option<PathBuf>,
}

/// Per-spawn configuration.
pub struct SpawnConfig {
    pub guidance_path: Option<PathBuf>,
    pub task: Option<String>,
    pub limits: AgentLimits,
    pub input: Option<AgentInput>,
    pub parent_id: Option<SessionId>,
    pub tools: Arc<ToolRegistry>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            guidance_path: None,
            task: None,
            limits: AgentLimits::default(),
            input: None,
            parent_id: None,
            tools: Arc::new(ToolRegistry::new()),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Per-continue configuration.
pub struct ContinueConfig {
    pub guidance_path: Option<PathBuf>,
    pub limits: AgentLimits,
    pub tools: Arc<ToolRegistry>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl Default for ContinueConfig {
    fn default() -> Self {
        Self {
            guidance_path: None,
            limits: AgentLimits::default(),
            tools: Arc::new(ToolRegistry::new()),
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Shutdown behavior.
#[derive(Debug, Clone)]
pub struct ShutdownOptions {
    /// Wait for in-flight sessions before force-terminating.
    pub graceful: bool,
    pub timeout_ms: u64,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self { graceful: true, timeout_ms: 30_000 }
    }
}

/// Session listing filter; empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub statuses: Vec<AgentStatus>,
    pub tag: Option<String>,
    pub parent_id: Option<SessionId>,
}

impl SessionFilter {
    fn matches(&self, status: AgentStatus, tags: &[String], parent: Option<&SessionId>) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&status) {
            return false;
        }
        if let Some(tag) = &self.tag {
            if !tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(parent_id) = &self.parent_id {
            if parent != Some(parent_id) {
                return false;
            }
        }
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionSlot {
    handle: Arc<AgentHandle>,
    adapter: Arc<dyn AgentAdapter>,
    tags: Vec<String>,
    parent_id: Option<SessionId>,
    pump: JoinHandle<()>,
}

pub struct Coordinator {
    status: Mutex<CoordinatorStatus>,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
    bus: EventBus<CoordinatorEvent>,
    store: Option<Arc<dyn SnapshotStore>>,
    default_guidance_path: Option<PathBuf>,
    injectors: Option<Arc<ContextInjectorRegistry>>,
    timezone: Tz,
    skills_path: Option<PathBuf>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("default_guidance_path", &self.default_guidance_path)
            .field("timezone", &self.timezone)
            .field("skills_path", &self.skills_path)
            .finish()
    }
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self> {
        let timezone = match &config.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| Error::Timezone(name.clone()))?,
            None => Tz::UTC,
        };
        Ok(Self {
            status: Mutex::new(CoordinatorStatus::Stopped),
            sessions: RwLock::new(HashMap::new()),
            bus: EventBus::new(),
            store: config.snapshot_store,
            default_guidance_path: config.default_guidance_path,
            injectors: config.injectors,
            timezone,
            skills_path: config.skills_path,
        })
    }

    pub fn status(&self) -> CoordinatorStatus {
        *self.status.lock()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Subscribe to the multiplexed coordinator events.
    pub fn subscribe(
        &self,
        handler: impl Fn(&CoordinatorEvent) + Send + Sync + 'static,
    ) -> Subscription<CoordinatorEvent> {
        self.bus.subscribe(handler)
    }

    /// Async consumer of coordinator events from this moment on.
    pub fn events(&self) -> EventStream<CoordinatorEvent> {
        self.bus.stream()
    }

    // ── lifecycle ──────────────────────────────────────────────────

    /// Move from `stopped` to `running`.
    pub fn start(&self) -> Result<()> {
        let mut status = self.status.lock();
        if *status != CoordinatorStatus::Stopped {
            return Err(Error::invalid_state(CoordinatorStatus::Stopped, *status));
        }
        *status = CoordinatorStatus::Starting;
        *status = CoordinatorStatus::Running;
        tracing::info!("coordinator running");
        Ok(())
    }

    /// Wind down every session and clear the table.
    ///
    /// With `graceful`, running and waiting sessions get `timeout_ms` to
    /// finish on their own; everything still alive afterwards is terminated
    /// with reason `"Coordinator shutdown"`.
    pub async fn shutdown(&self, options: ShutdownOptions) -> Result<()> {
        {
            let mut status = self.status.lock();
            if *status != CoordinatorStatus::Running {
                return Err(Error::invalid_state(CoordinatorStatus::Running, *status));
            }
            *status = CoordinatorStatus::Stopping;
        }

        let handles: Vec<Arc<AgentHandle>> = {
            let sessions = self.sessions.read();
            sessions.values().map(|s| s.handle.clone()).collect()
        };

        if options.graceful {
            let inflight: Vec<Arc<AgentHandle>> = handles
                .iter()
                .filter(|h| {
                    matches!(h.status(), AgentStatus::Running | AgentStatus::Waiting)
                })
                .cloned()
                .collect();
            if !inflight.is_empty() {
                let waits = inflight.iter().map(|h| h.wait());
                let _ = tokio::time::timeout(
                    Duration::from_millis(options.timeout_ms),
                    futures_util::future::join_all(waits),
                )
                .await;
            }
        }

        for handle in &handles {
            if !handle.status().is_terminal() {
                handle.terminate(Some("Coordinator shutdown".into()));
            }
        }

        // Give terminal events a tick to flow through the pumps (checkpoint
        // persistence happens there).
        tokio::task::yield_now().await;

        self.sessions.write().clear();
        *self.status.lock() = CoordinatorStatus::Stopped;
        tracing::info!(sessions = handles.len(), "coordinator stopped");
        Ok(())
    }

    // ── spawn / continue ───────────────────────────────────────────

    /// Spawn a fresh session on `adapter`.
    pub async fn spawn(
        &self,
        adapter: Arc<dyn AgentAdapter>,
        config: SpawnConfig,
    ) -> Result<Arc<AgentHandle>> {
        self.ensure_running()?;

        let session_id = SessionId::generate();
        let guidance_path = config
            .guidance_path
            .clone()
            .or_else(|| self.default_guidance_path.clone())
            .ok_or_else(|| Error::Guidance("no guidance path configured".into()))?;
        let guidance = Arc::new(GuidanceContext::load(&guidance_path));
        let skills = self
            .skills_path
            .as_ref()
            .map(|p| Arc::new(SkillSet::load(p)));

        let system_context = match &self.injectors {
            Some(injectors) => {
                let ctx = InjectionContext {
                    session_id: session_id.clone(),
                    guidance: guidance.clone(),
                    timezone: self.timezone.to_string(),
                    checkpoint: None,
                };
                injectors.collect_system_context(&ctx, None).await
            }
            None => None,
        };
        let context_injection = system_context.map(|system_context| ContextInjection {
            system_context: Some(system_context),
            resume_messages: None,
        });

        let create = AdapterCreateConfig {
            session_id: session_id.clone(),
            guidance,
            task: config.task,
            limits: config.limits,
            input: config.input,
            parent_id: config.parent_id.clone(),
            tools: config.tools,
            tags: config.tags.clone(),
            metadata: config.metadata,
            skills,
            context_injection,
        };
        let instance = adapter.create(create).await?;
        let handle = AgentHandle::new(instance);

        self.install_session(
            session_id.clone(),
            handle.clone(),
            adapter,
            config.tags.clone(),
            config.parent_id.clone(),
        );

        self.bus.emit(CoordinatorEvent::AgentSpawned {
            session_id,
            tags: config.tags,
            parent_id: config.parent_id,
        });
        handle.start();
        Ok(handle)
    }

    /// Restore a session from its checkpoint and continue it with `input`.
    pub async fn continue_session(
        &self,
        session_id: &SessionId,
        input: AgentInput,
        adapter: Arc<dyn AgentAdapter>,
        config: ContinueConfig,
    ) -> Result<Arc<AgentHandle>> {
        self.ensure_running()?;

        let checkpoint = match &self.store {
            Some(store) => store.load(session_id).await?,
            None => None,
        }
        .ok_or_else(|| Error::CheckpointNotFound(session_id.to_string()))?;

        let guidance_path = config
            .guidance_path
            .clone()
            .or_else(|| {
                if checkpoint.guidance.guidance_path.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(&checkpoint.guidance.guidance_path))
                }
            })
            .or_else(|| self.default_guidance_path.clone())
            .ok_or_else(|| Error::Guidance("no guidance path configured".into()))?;
        let guidance = Arc::new(GuidanceContext::load(&guidance_path));
        let skills = self
            .skills_path
            .as_ref()
            .map(|p| Arc::new(SkillSet::load(p)));

        let resume_messages = match &self.injectors {
            Some(injectors) => {
                let ctx = InjectionContext {
                    session_id: session_id.clone(),
                    guidance: guidance.clone(),
                    timezone: self.timezone.to_string(),
                    checkpoint: Some(checkpoint.clone()),
                };
                injectors.collect_resume_context(&ctx).await
            }
            None => Vec::new(),
        };
        let context_injection = if resume_messages.is_empty() {
            None
        } else {
            Some(ContextInjection {
                system_context: None,
                resume_messages: Some(resume_messages),
            })
        };

        let mut tags = checkpoint.session.tags.clone();
        for tag in &config.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        let parent_id = checkpoint.session.parent_id.clone();

        let input = if input.is_empty() { None } else { Some(input) };
        let create = AdapterCreateConfig {
            session_id: session_id.clone(),
            guidance,
            task: checkpoint.session.task.clone(),
            limits: config.limits,
            input,
            parent_id: parent_id.clone(),
            tools: config.tools,
            tags: tags.clone(),
            metadata: config.metadata,
            skills,
            context_injection,
        };
        let instance = adapter.restore(checkpoint, create).await?;
        let handle = AgentHandle::new(instance);

        self.install_session(
            session_id.clone(),
            handle.clone(),
            adapter,
            tags.clone(),
            parent_id.clone(),
        );

        self.bus.emit(CoordinatorEvent::AgentSpawned {
            session_id: session_id.clone(),
            tags,
            parent_id,
        });
        handle.start();
        Ok(handle)
    }

    /// Register the session and start the pump that re-emits its events. A
    /// continue for a live session id replaces the existing entry.
    fn install_session(
        &self,
        session_id: SessionId,
        handle: Arc<AgentHandle>,
        adapter: Arc<dyn AgentAdapter>,
        tags: Vec<String>,
        parent_id: Option<SessionId>,
    ) {
        let pump = self.spawn_pump(session_id.clone(), handle.clone(), adapter.clone());
        let slot = SessionSlot { handle, adapter, tags, parent_id, pump };
        if let Some(previous) = self.sessions.write().insert(session_id.clone(), slot) {
            tracing::warn!(
                session_id = %session_id,
                "session id already live; replacing table entry"
            );
            previous.pump.abort();
        }
    }

    /// Per-session pump: re-emit every event, and on `done` persist the
    /// checkpoint (enriched with the adapter identity) before announcing
    /// `agent_done`.
    fn spawn_pump(
        &self,
        session_id: SessionId,
        handle: Arc<AgentHandle>,
        adapter: Arc<dyn AgentAdapter>,
    ) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let store = self.store.clone();
        // Subscribe before the task is spawned so no early event is missed.
        let mut events = handle.live_events();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let done = match &event {
                    AgentEvent::Done { result } => Some(result.clone()),
                    _ => None,
                };
                bus.emit(CoordinatorEvent::AgentEvent {
                    session_id: session_id.clone(),
                    event,
                });
                if let Some(result) = done {
                    if let Some(store) = &store {
                        let mut checkpoint = handle.checkpoint();
                        checkpoint.adapter_config.provider = adapter.model_provider().to_owned();
                        checkpoint.adapter_config.model = adapter.model_name().to_owned();
                        if let Err(e) = store.save(&checkpoint).await {
                            tracing::warn!(
                                session_id = %session_id,
                                error = %e,
                                "failed to persist checkpoint"
                            );
                        }
                    }
                    bus.emit(CoordinatorEvent::AgentDone { session_id: session_id.clone(), result });
                    break;
                }
            }
        })
    }

    // ── lookup ─────────────────────────────────────────────────────

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<AgentHandle>> {
        self.sessions.read().get(session_id).map(|s| s.handle.clone())
    }

    pub fn get_adapter(&self, session_id: &SessionId) -> Option<Arc<dyn AgentAdapter>> {
        self.sessions.read().get(session_id).map(|s| s.adapter.clone())
    }

    /// Sessions matching the filter, in unspecified order.
    pub fn list(&self, filter: &SessionFilter) -> Vec<Arc<AgentHandle>> {
        self.sessions
            .read()
            .values()
            .filter(|slot| {
                filter.matches(slot.handle.status(), &slot.tags, slot.parent_id.as_ref())
            })
            .map(|slot| slot.handle.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    // ── checkpoint access ──────────────────────────────────────────

    pub async fn list_checkpoints(&self) -> Vec<SessionId> {
        match &self.store {
            Some(store) => store.list().await.unwrap_or_default(),
            None => Vec::new(),
        }
    }

    pub async fn load_checkpoint(&self, session_id: &SessionId) -> Option<AgentCheckpoint> {
        match &self.store {
            Some(store) => store.load(session_id).await.ok().flatten(),
            None => None,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        let status = *self.status.lock();
        if status != CoordinatorStatus::Running {
            return Err(Error::invalid_state(CoordinatorStatus::Running, status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_requires_stopped() {
        let coordinator = Coordinator::new(CoordinatorConfig::default()).unwrap();
        coordinator.start().unwrap();
        let err = coordinator.start().unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn shutdown_requires_running() {
        let coordinator = Coordinator::new(CoordinatorConfig::default()).unwrap();
        let err = coordinator.shutdown(ShutdownOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        let err = Coordinator::new(CoordinatorConfig {
            timezone: Some("Not/AZone".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Timezone(tz) if tz == "Not/AZone"));
    }

    #[test]
    fn timezone_defaults_to_utc() {
        let coordinator = Coordinator::new(CoordinatorConfig::default()).unwrap();
        assert_eq!(coordinator.timezone(), Tz::UTC);
    }

    #[test]
    fn filter_matches_status_tag_and_parent() {
        let filter = SessionFilter {
            statuses: vec![AgentStatus::Running, AgentStatus::Waiting],
            tag: Some("batch".into()),
            parent_id: Some("parent-1".into()),
        };
        let parent: SessionId = "parent-1".into();

        assert!(filter.matches(
            AgentStatus::Running,
            &["batch".into(), "other".into()],
            Some(&parent)
        ));
        assert!(!filter.matches(AgentStatus::Completed, &["batch".into()], Some(&parent)));
        assert!(!filter.matches(AgentStatus::Running, &["other".into()], Some(&parent)));
        assert!(!filter.matches(AgentStatus::Running, &["batch".into()], None));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = SessionFilter::default();
        assert!(filter.matches(AgentStatus::Completed, &[], None));
    }
}
