//! Agent handle — the stable external façade over one running session.
//!
//! The handle owns the event bus its instance emits on. `start()` spawns the
//! run loop once and pumps instance events onto the bus; consumers subscribe
//! or iterate, and `wait()` resolves with the terminal result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};

use muster_adapter::traits::AgentInstance;
use muster_domain::stream::BoxStream;
use muster_domain::{
    AgentCheckpoint, AgentEvent, AgentInput, AgentResult, AgentStatus, PendingRequest,
    PendingResolution, RunMetrics, SessionId,
};

use crate::bus::{EventBus, Subscription};

pub struct AgentHandle {
    instance: Arc<dyn AgentInstance>,
    bus: EventBus<AgentEvent>,
    started: AtomicBool,
    terminal: watch::Sender<Option<AgentResult>>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl AgentHandle {
    pub fn new(instance: Arc<dyn AgentInstance>) -> Arc<Self> {
        let (terminal, _) = watch::channel(None);
        Arc::new(Self {
            instance,
            bus: EventBus::new(),
            started: AtomicBool::new(false),
            terminal,
        })
    }

    pub fn id(&self) -> SessionId {
        self.instance.id()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.instance.created_at()
    }

    pub fn status(&self) -> AgentStatus {
        self.instance.status()
    }

    pub fn metrics(&self) -> RunMetrics {
        self.instance.metrics()
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.instance.pending_requests()
    }

    pub fn checkpoint(&self) -> AgentCheckpoint {
        self.instance.checkpoint()
    }

    /// Start the run loop. Idempotent: only the first call schedules it.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
        let instance = self.instance.clone();
        let bus = self.bus.clone();
        let terminal = self.terminal.clone();

        tokio::spawn(async move {
            let runner = {
                let instance = instance.clone();
                tokio::spawn(async move {
                    if let Err(e) = instance.run(tx).await {
                        tracing::warn!(error = %e, "session run loop ended with error");
                    }
                })
            };

            while let Some(event) = rx.recv().await {
                if let AgentEvent::Done { result } = &event {
                    terminal.send_replace(Some(result.clone()));
                }
                bus.emit(event);
            }
            let _ = runner.await;
        });
    }

    /// Subscribe a handler to every future event.
    pub fn subscribe(
        &self,
        handler: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> Subscription<AgentEvent> {
        self.bus.subscribe(handler)
    }

    /// Live events only, from this moment on.
    pub fn live_events(&self) -> crate::bus::EventStream<AgentEvent> {
        self.bus.stream()
    }

    /// Historical events first, then live events, ending after the first
    /// `done` event (inclusive).
    pub fn events(&self) -> BoxStream<'static, AgentEvent> {
        let stream = self.bus.replay_stream();
        let mut seen_done = false;
        Box::pin(stream.take_while(move |event| {
            let keep = !seen_done;
            if event.is_done() {
                seen_done = true;
            }
            futures_util::future::ready(keep)
        }))
    }

    /// The terminal result: immediately when already terminal, otherwise when
    /// the `done` event fires.
    pub async fn wait(&self) -> AgentResult {
        let mut rx = self.terminal.subscribe();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                // Sender dropped with no terminal result; report what we know.
                return AgentResult {
                    status: self.instance.status(),
                    output: None,
                    error: Some("session ended without a terminal event".into()),
                    metrics: self.instance.metrics(),
                };
            }
        }
    }

    pub fn send(&self, input: AgentInput) {
        self.instance.send(input);
    }

    pub fn pause(&self) {
        self.instance.pause();
    }

    pub fn resume(&self) {
        self.instance.resume();
    }

    pub fn abort(&self) {
        self.instance.abort();
    }

    pub fn resolve(&self, resolutions: Vec<PendingResolution>) {
        self.instance.resolve(resolutions);
    }

    /// Force-terminate: mark the instance terminated, resolve `wait()`, and
    /// emit the synthetic terminal `done` event. A no-op on an already
    /// terminal session.
    pub fn terminate(&self, reason: Option<String>) {
        if let Some(result) = self.instance.terminate(reason) {
            self.terminal.send_replace(Some(result.clone()));
            self.bus.emit(AgentEvent::Done { result });
        }
    }
}
