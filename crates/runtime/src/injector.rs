//! Context injector registry.
//!
//! Injectors contribute context at session boundaries: system-prompt
//! fragments on spawn, resume messages on continue. They run in ascending
//! `order`; a failing injector is logged and skipped, never fatal.

use std::sync::Arc;

use async_trait::async_trait;

use muster_domain::{AgentCheckpoint, CheckpointMessage, Error, Result, SessionId};
use muster_guidance::GuidanceContext;

/// Default separator between system-context fragments.
pub const DEFAULT_SEPARATOR: &str = "\n\n---\n\n";

/// What an injector sees when asked for context.
pub struct InjectionContext {
    pub session_id: SessionId,
    pub guidance: Arc<GuidanceContext>,
    /// IANA timezone name of the coordinator.
    pub timezone: String,
    /// Present on the continue path.
    pub checkpoint: Option<AgentCheckpoint>,
}

/// An ordered producer of spawn-time or resume-time context.
#[async_trait]
pub trait ContextInjector: Send + Sync {
    fn name(&self) -> &str;

    /// Position in the pipeline; lower runs earlier.
    fn order(&self) -> i32;

    /// A system-prompt fragment for a fresh session, or `None`.
    async fn inject_system_context(&self, _ctx: &InjectionContext) -> Result<Option<String>> {
        Ok(None)
    }

    /// Messages appended after the checkpoint transcript on continue, or
    /// `None`.
    async fn inject_resume_context(
        &self,
        _ctx: &InjectionContext,
    ) -> Result<Option<Vec<CheckpointMessage>>> {
        Ok(None)
    }
}

/// Name-unique, order-sorted injector pipeline.
#[derive(Default)]
pub struct ContextInjectorRegistry {
    injectors: Vec<Arc<dyn ContextInjector>>,
}

impl ContextInjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an injector. Rejects duplicate names.
    pub fn register(&mut self, injector: Arc<dyn ContextInjector>) -> Result<()> {
        if self.injectors.iter().any(|i| i.name() == injector.name()) {
            return Err(Error::DuplicateInjector(injector.name().to_owned()));
        }
        self.injectors.push(injector);
        self.injectors.sort_by_key(|i| i.order());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.injectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.injectors.is_empty()
    }

    /// Concatenate all non-empty system fragments in order. `None` when every
    /// injector returned nothing.
    pub async fn collect_system_context(
        &self,
        ctx: &InjectionContext,
        separator: Option<&str>,
    ) -> Option<String> {
        let separator = separator.unwrap_or(DEFAULT_SEPARATOR);
        let mut fragments: Vec<String> = Vec::new();
        for injector in &self.injectors {
            match injector.inject_system_context(ctx).await {
                Ok(Some(fragment)) if !fragment.is_empty() => fragments.push(fragment),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        injector = injector.name(),
                        error = %e,
                        "system context injector failed; skipping"
                    );
                }
            }
        }
        if fragments.is_empty() {
            None
        } else {
            Some(fragments.join(separator))
        }
    }

    /// Concatenate all resume-message arrays in order.
    pub async fn collect_resume_context(&self, ctx: &InjectionContext) -> Vec<CheckpointMessage> {
        let mut messages = Vec::new();
        for injector in &self.injectors {
            match injector.inject_resume_context(ctx).await {
                Ok(Some(batch)) => messages.extend(batch),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        injector = injector.name(),
                        error = %e,
                        "resume context injector failed; skipping"
                    );
                }
            }
        }
        messages
    }
}
