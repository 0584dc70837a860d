//! Session runtime — the per-agent state machine.
//!
//! One [`SessionRuntime`] drives one agent session: it pops queued inputs,
//! runs prompt turns against the model backend, dispatches tool calls with
//! durable step contexts, surfaces suspensions as pending requests, and emits
//! the canonical event stream. It implements the instance contract the
//! coordinator supervises through a handle.
//!
//! Entry point: [`AgentInstance::run`] loops over input cycles until the
//! session reaches a terminal status.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Notify};

use muster_adapter::codec::{MessageCodec, NativeCodec};
use muster_adapter::traits::{AgentInstance, AgentLimits, ModelEvent, ModelStream};
use muster_domain::checkpoint::{AdapterSettings, SessionCheckpoint};
use muster_domain::stream::{AdapterEvent, MessageUpdate};
use muster_domain::suspend::suspension_step_id;
use muster_domain::{
    AgentCheckpoint, AgentEvent, AgentInput, AgentResult, AgentStatus, CancelToken, Error,
    PendingRequest, PendingResolution, Result, ResumeData, RunMetrics, SessionId,
};
use muster_guidance::GuidanceContext;
use muster_steps::{StepError, ToolTracker};
use muster_tools::{ToolContext, ToolOutcome, ToolProgress, ToolProgressFn, ToolRegistry};
use parking_lot::Mutex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Construction parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to build a session runtime.
pub struct SessionParams {
    pub session_id: SessionId,
    pub adapter_name: String,
    pub model: Arc<dyn ModelStream>,
    pub tools: Arc<ToolRegistry>,
    pub guidance: Arc<GuidanceContext>,
    pub limits: AgentLimits,
    pub task: Option<String>,
    pub parent_id: Option<SessionId>,
    pub tags: Vec<String>,
    pub metadata: BTreeMap<String, Value>,
}

/// How a resolver answered a parked suspension.
enum ResolutionSignal {
    Resolved,
    Cancelled { reason: Option<String> },
}

/// How one prompt turn ended.
enum PromptEnd {
    Finished,
    Aborted,
}

/// How one run cycle ended.
enum CycleEnd {
    /// The turn completed; the loop decides whether to run another.
    Turned,
    /// The turn left pending requests behind; park until resolved.
    Waiting,
    /// The session reached a terminal status.
    Terminal,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionRuntime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SessionInner {
    id: SessionId,
    created_at: DateTime<Utc>,
    adapter_name: String,
    model: Arc<dyn ModelStream>,
    tools: Arc<ToolRegistry>,
    guidance: Arc<GuidanceContext>,
    limits: AgentLimits,

    task: Option<String>,
    parent_id: Option<SessionId>,
    tags: Vec<String>,
    metadata: Mutex<BTreeMap<String, Value>>,

    status: Mutex<AgentStatus>,
    pending: Mutex<Vec<PendingRequest>>,
    resolutions: Mutex<HashMap<String, PendingResolution>>,
    input_queue: Mutex<VecDeque<AgentInput>>,
    resolvers: Mutex<HashMap<String, oneshot::Sender<ResolutionSignal>>>,
    tracker: ToolTracker,
    cancel: CancelToken,
    pause: watch::Sender<bool>,
    wake: Notify,

    events: Mutex<Option<mpsc::UnboundedSender<AgentEvent>>>,
    terminal: Mutex<Option<AgentResult>>,
    ran: AtomicBool,
    /// Set when a resolution arrived with no live resolver (the restored
    /// path); the next cycle prompts so the tool can replay.
    resume_pending: AtomicBool,

    started_at: Mutex<Option<Instant>>,
    turns: AtomicU32,
    tool_calls_total: AtomicU32,
    tool_call_times: Mutex<HashMap<String, Instant>>,
    last_output: Mutex<Option<String>>,
}

/// The canonical [`AgentInstance`] implementation.
pub struct SessionRuntime {
    inner: Arc<SessionInner>,
}

impl SessionRuntime {
    /// A fresh session. `initial_input` is consumed by the first run cycle.
    pub fn new(params: SessionParams, initial_input: Option<AgentInput>) -> Arc<Self> {
        let runtime = Self::build(params, Utc::now(), 0);
        if let Some(input) = initial_input {
            runtime.inner.input_queue.lock().push_back(input);
        }
        Arc::new(runtime)
    }

    /// A session restored from a checkpoint: identity, creation time, turn
    /// count, tool executions, and guidance state are preserved.
    pub fn restored(
        params: SessionParams,
        checkpoint: &AgentCheckpoint,
        initial_input: Option<AgentInput>,
    ) -> Arc<Self> {
        let runtime = Self::build(
            params,
            checkpoint.session.created_at,
            checkpoint.session.metrics.turns,
        );
        runtime.inner.tracker.restore(checkpoint.tool_executions.clone());
        runtime.inner.guidance.restore_state(&checkpoint.guidance);
        if let Some(input) = initial_input {
            runtime.inner.input_queue.lock().push_back(input);
        }
        Arc::new(runtime)
    }

    fn build(params: SessionParams, created_at: DateTime<Utc>, turns: u32) -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                id: params.session_id,
                created_at,
                adapter_name: params.adapter_name,
                model: params.model,
                tools: params.tools,
                guidance: params.guidance,
                limits: params.limits,
                task: params.task,
                parent_id: params.parent_id,
                tags: params.tags,
                metadata: Mutex::new(params.metadata),
                status: Mutex::new(AgentStatus::Initializing),
                pending: Mutex::new(Vec::new()),
                resolutions: Mutex::new(HashMap::new()),
                input_queue: Mutex::new(VecDeque::new()),
                resolvers: Mutex::new(HashMap::new()),
                tracker: ToolTracker::new(),
                cancel: CancelToken::new(),
                pause,
                wake: Notify::new(),
                events: Mutex::new(None),
                terminal: Mutex::new(None),
                ran: AtomicBool::new(false),
                resume_pending: AtomicBool::new(false),
                started_at: Mutex::new(None),
                turns: AtomicU32::new(turns),
                tool_calls_total: AtomicU32::new(0),
                tool_call_times: Mutex::new(HashMap::new()),
                last_output: Mutex::new(None),
            }),
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.inner.tags.clone()
    }

    pub fn parent_id(&self) -> Option<SessionId> {
        self.inner.parent_id.clone()
    }

    // ── event plumbing ─────────────────────────────────────────────

    fn emit(&self, event: AgentEvent) {
        if self.inner.terminal.lock().is_some() {
            return;
        }
        self.emit_raw(event);
    }

    fn emit_raw(&self, event: AgentEvent) {
        if let Some(tx) = self.inner.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Transition to a non-terminal status and emit the status event.
    fn set_status_emit(&self, status: AgentStatus) {
        {
            let mut current = self.inner.status.lock();
            if current.is_terminal() {
                return;
            }
            *current = status;
        }
        self.emit(AgentEvent::Status { status });
    }

    fn build_result(&self, status: AgentStatus, error: Option<String>) -> AgentResult {
        AgentResult {
            status,
            output: self.inner.last_output.lock().clone(),
            error,
            metrics: self.metrics(),
        }
    }

    /// Reach a terminal status exactly once, emitting the prescribed event
    /// tail: `status` then `done` for completed/aborted, `error` then `done`
    /// for failed. Returns `None` when the session already ended.
    fn finish(&self, status: AgentStatus, error: Option<String>) -> Option<AgentResult> {
        let result = self.build_result(status, error.clone());
        {
            let mut terminal = self.inner.terminal.lock();
            if terminal.is_some() {
                return None;
            }
            *terminal = Some(result.clone());
        }
        *self.inner.status.lock() = status;
        match status {
            AgentStatus::Completed | AgentStatus::Aborted => {
                self.emit_raw(AgentEvent::Status { status });
            }
            AgentStatus::Failed => {
                self.emit_raw(AgentEvent::Error {
                    message: error.unwrap_or_else(|| "agent failed".into()),
                    fatal: true,
                });
            }
            _ => {}
        }
        self.emit_raw(AgentEvent::Done { result: result.clone() });
        Some(result)
    }

    fn fail(&self, message: String) {
        tracing::warn!(session_id = %self.inner.id, error = %message, "session failed");
        self.finish(AgentStatus::Failed, Some(message));
    }

    // ── run loop ───────────────────────────────────────────────────

    async fn run_loop(&self) {
        loop {
            if self.inner.terminal.lock().is_some() || self.status().is_terminal() {
                break;
            }
            let input = self.inner.input_queue.lock().pop_front();
            match self.run_cycle(input).await {
                CycleEnd::Terminal => break,
                CycleEnd::Waiting => {
                    loop {
                        let notified = self.inner.wake.notified();
                        tokio::pin!(notified);
                        // Register before the status check so a wake between
                        // check and await is not lost.
                        notified.as_mut().enable();
                        if self.status() != AgentStatus::Waiting {
                            break;
                        }
                        notified.await;
                    }
                }
                CycleEnd::Turned => {
                    let queue_empty = self.inner.input_queue.lock().is_empty();
                    let replay = self.inner.resume_pending.load(Ordering::SeqCst);
                    if queue_empty && !replay {
                        self.finish(AgentStatus::Completed, None);
                        break;
                    }
                }
            }
        }

        // An abort that landed while no turn was in flight still owes the
        // caller a terminal event. Termination emits through the handle.
        let status = self.status();
        if status.is_terminal() && status != AgentStatus::Terminated {
            self.finish(status, None);
        }
    }

    /// One cycle: status to running, prompt (when there is anything to
    /// prompt about), drain and translate events, classify the ending.
    async fn run_cycle(&self, input: Option<AgentInput>) -> CycleEnd {
        if let Some(context) = input.as_ref().and_then(|i| i.context.clone()) {
            self.inner.metadata.lock().extend(context);
        }
        self.set_status_emit(AgentStatus::Running);

        let message = input.and_then(|i| i.message);
        let replaying = self.inner.resume_pending.swap(false, Ordering::SeqCst);
        if message.is_none() && !replaying {
            tracing::debug!(session_id = %self.inner.id, "input queue empty; skipping prompt");
            return CycleEnd::Turned;
        }

        let (adapter_tx, mut adapter_rx) = mpsc::unbounded_channel::<AdapterEvent>();
        let driver = tokio::spawn(drive_prompt(self.inner.clone(), message, adapter_tx));

        while let Some(event) = adapter_rx.recv().await {
            self.pause_gate().await;
            self.translate(event);
        }

        let end = match driver.await {
            Err(e) => {
                self.fail(format!("prompt task failed: {e}"));
                return CycleEnd::Terminal;
            }
            Ok(Err(e)) => {
                self.fail(e.to_string());
                return CycleEnd::Terminal;
            }
            Ok(Ok(end)) => end,
        };

        if self.inner.terminal.lock().is_some() {
            return CycleEnd::Terminal;
        }

        match end {
            PromptEnd::Aborted => {
                self.finish(AgentStatus::Aborted, None);
                CycleEnd::Terminal
            }
            PromptEnd::Finished => {
                if let Some(stop) = self.inner.model.stop_info() {
                    if stop.is_error() {
                        self.fail(stop.error.unwrap_or_else(|| "model error".into()));
                        return CycleEnd::Terminal;
                    }
                }
                if !self.inner.pending.lock().is_empty() {
                    // The turn ended with requests still outstanding (e.g. a
                    // torn-down resolver); make sure the waiting state is
                    // visible, then park.
                    if self.status() != AgentStatus::Waiting {
                        self.set_status_emit(AgentStatus::Waiting);
                        let requests = self.inner.pending.lock().clone();
                        self.emit(AgentEvent::Suspended { pending_requests: requests });
                    }
                    CycleEnd::Waiting
                } else {
                    CycleEnd::Turned
                }
            }
        }
    }

    /// Hold delivery while paused, bracketing the gap with status events.
    async fn pause_gate(&self) {
        let mut rx = self.inner.pause.subscribe();
        if !*rx.borrow() {
            return;
        }
        self.emit(AgentEvent::Status { status: AgentStatus::Paused });
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.emit(AgentEvent::Status { status: AgentStatus::Running });
    }

    /// Adapter event → core events, sequence-preserving.
    fn translate(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::AgentStart => {
                self.emit(AgentEvent::Status { status: AgentStatus::Running });
            }
            AdapterEvent::MessageUpdate { update } => match update {
                MessageUpdate::TextDelta { text } => {
                    self.emit(AgentEvent::Output { text, is_final: false });
                }
                MessageUpdate::TextEnd => {
                    self.emit(AgentEvent::Output { text: String::new(), is_final: true });
                }
                MessageUpdate::ThinkingDelta { text } => {
                    self.emit(AgentEvent::Thought { content: text });
                }
            },
            AdapterEvent::ToolExecutionStart { tool_call_id, tool_name, input } => {
                self.emit(AgentEvent::ToolStart { tool_call_id, tool_name, input });
            }
            AdapterEvent::ToolExecutionUpdate { tool_call_id, tool_name, progress } => {
                self.emit(AgentEvent::ToolProgress { tool_call_id, tool_name, progress });
            }
            AdapterEvent::ToolExecutionEnd { tool_call_id, tool_name, output, error } => {
                let duration_ms = self
                    .inner
                    .tool_call_times
                    .lock()
                    .remove(&tool_call_id)
                    .map(|start| start.elapsed().as_millis() as u64)
                    .unwrap_or(0);
                self.emit(AgentEvent::ToolEnd {
                    tool_call_id,
                    tool_name,
                    output,
                    error,
                    duration_ms,
                });
            }
            AdapterEvent::TurnEnd => {
                self.inner.turns.fetch_add(1, Ordering::SeqCst);
            }
            AdapterEvent::AgentEnd => {}
            AdapterEvent::SuspensionRaised { requests } => {
                self.set_status_emit(AgentStatus::Waiting);
                self.emit(AgentEvent::Suspended { pending_requests: requests });
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentInstance
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl AgentInstance for SessionRuntime {
    fn id(&self) -> SessionId {
        self.inner.id.clone()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    fn status(&self) -> AgentStatus {
        *self.inner.status.lock()
    }

    async fn run(&self, events: mpsc::UnboundedSender<AgentEvent>) -> Result<()> {
        if self.inner.ran.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_state("unstarted session", "already running"));
        }
        *self.inner.events.lock() = Some(events);
        *self.inner.started_at.lock() = Some(Instant::now());
        self.run_loop().await;
        // Drop the sender so the handle's pump observes the end of stream.
        *self.inner.events.lock() = None;
        Ok(())
    }

    fn send(&self, input: AgentInput) {
        if self.status().is_terminal() {
            tracing::debug!(session_id = %self.inner.id, "send after terminal status; dropping");
            return;
        }
        if self.status() == AgentStatus::Running {
            if let Some(message) = &input.message {
                self.inner.model.steer(message);
                if let Some(context) = input.context {
                    self.inner.metadata.lock().extend(context);
                }
                return;
            }
        }
        self.inner.input_queue.lock().push_back(input);
    }

    fn pause(&self) {
        let mut status = self.inner.status.lock();
        if *status == AgentStatus::Running {
            *status = AgentStatus::Paused;
            self.inner.pause.send_replace(true);
        }
    }

    fn resume(&self) {
        let mut status = self.inner.status.lock();
        if *status == AgentStatus::Paused {
            *status = AgentStatus::Running;
            self.inner.pause.send_replace(false);
        }
    }

    fn abort(&self) {
        {
            let mut status = self.inner.status.lock();
            if status.is_terminal() {
                return;
            }
            *status = AgentStatus::Aborted;
        }
        self.inner.cancel.cancel();
        self.inner.model.abort();
        self.inner.pending.lock().clear();
        self.inner.resolvers.lock().clear();
        self.inner.pause.send_replace(false);
        self.inner.wake.notify_waiters();
    }

    fn resolve(&self, resolutions: Vec<PendingResolution>) {
        if self.status().is_terminal() {
            return;
        }

        let mut signals = Vec::new();
        for resolution in resolutions {
            let call_id = resolution.tool_call_id.clone();
            self.inner
                .resolutions
                .lock()
                .insert(call_id.clone(), resolution.clone());

            let resolver = self.inner.resolvers.lock().remove(&call_id);
            if resolution.cancel {
                if let Some(tx) = resolver {
                    signals.push((tx, ResolutionSignal::Cancelled { reason: resolution.reason.clone() }));
                }
            } else {
                self.inner.tracker.set_resume(
                    &call_id,
                    ResumeData {
                        step_id: suspension_step_id(&call_id),
                        result: resolution.resume_value(),
                    },
                );
                match resolver {
                    Some(tx) => signals.push((tx, ResolutionSignal::Resolved)),
                    None => self.inner.resume_pending.store(true, Ordering::SeqCst),
                }
            }

            self.inner.pending.lock().retain(|p| p.tool_call_id != call_id);
        }

        let became_running = {
            let pending_empty = self.inner.pending.lock().is_empty();
            let mut status = self.inner.status.lock();
            if pending_empty && *status == AgentStatus::Waiting {
                *status = AgentStatus::Running;
                true
            } else {
                false
            }
        };
        if became_running {
            self.emit(AgentEvent::Status { status: AgentStatus::Running });
        }

        for (tx, signal) in signals {
            let _ = tx.send(signal);
        }
        self.inner.wake.notify_waiters();
    }

    fn pending_requests(&self) -> Vec<PendingRequest> {
        self.inner.pending.lock().clone()
    }

    fn checkpoint(&self) -> AgentCheckpoint {
        AgentCheckpoint {
            timestamp: Utc::now(),
            adapter_name: self.inner.adapter_name.clone(),
            session: SessionCheckpoint {
                id: self.inner.id.clone(),
                parent_id: self.inner.parent_id.clone(),
                created_at: self.inner.created_at,
                tags: self.inner.tags.clone(),
                metadata: self.inner.metadata.lock().clone(),
                task: self.inner.task.clone(),
                metrics: self.metrics(),
            },
            guidance: self.inner.guidance.state(),
            messages: NativeCodec.decode(&self.inner.model.messages()),
            adapter_config: AdapterSettings::default(),
            tool_executions: self.inner.tracker.snapshot(),
        }
    }

    fn metrics(&self) -> RunMetrics {
        RunMetrics {
            duration_ms: self
                .inner
                .started_at
                .lock()
                .map(|s| s.elapsed().as_millis() as u64)
                .unwrap_or(0),
            turns: self.inner.turns.load(Ordering::SeqCst),
            tool_calls: self.inner.tool_calls_total.load(Ordering::SeqCst),
            tokens_used: None,
        }
    }

    fn terminate(&self, reason: Option<String>) -> Option<AgentResult> {
        let result = {
            let mut terminal = self.inner.terminal.lock();
            if terminal.is_some() {
                return None;
            }
            let result = AgentResult {
                status: AgentStatus::Terminated,
                output: self.inner.last_output.lock().clone(),
                error: Some(reason.unwrap_or_else(|| "Agent terminated".into())),
                metrics: self.metrics(),
            };
            *terminal = Some(result.clone());
            result
        };
        *self.inner.status.lock() = AgentStatus::Terminated;
        self.inner.cancel.cancel();
        self.inner.model.abort();
        self.inner.pending.lock().clear();
        self.inner.resolvers.lock().clear();
        self.inner.pause.send_replace(false);
        self.inner.wake.notify_waiters();
        Some(result)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompt driver — model rounds + tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn drive_prompt(
    inner: Arc<SessionInner>,
    message: Option<String>,
    tx: mpsc::UnboundedSender<AdapterEvent>,
) -> Result<PromptEnd> {
    let _ = tx.send(AdapterEvent::AgentStart);
    if let Some(message) = &message {
        inner.model.push_user(message);
    }

    let mut rounds = 0u32;
    loop {
        if inner.cancel.is_cancelled() {
            return Ok(PromptEnd::Aborted);
        }
        rounds += 1;
        if rounds > inner.limits.max_tool_rounds {
            tracing::warn!(
                session_id = %inner.id,
                limit = inner.limits.max_tool_rounds,
                "tool round limit reached; ending turn"
            );
            break;
        }

        let mut stream = inner.model.stream_turn().await?;
        let mut tool_calls: Vec<(String, String, Value)> = Vec::new();
        let mut text_buf = String::new();

        while let Some(event) = stream.next().await {
            if inner.cancel.is_cancelled() {
                if !text_buf.is_empty() {
                    *inner.last_output.lock() = Some(text_buf);
                }
                return Ok(PromptEnd::Aborted);
            }
            match event? {
                ModelEvent::TextDelta { text } => {
                    text_buf.push_str(&text);
                    let _ = tx.send(AdapterEvent::MessageUpdate {
                        update: MessageUpdate::TextDelta { text },
                    });
                }
                ModelEvent::TextEnd => {
                    if !text_buf.is_empty() {
                        *inner.last_output.lock() = Some(text_buf.clone());
                    }
                    let _ = tx.send(AdapterEvent::MessageUpdate { update: MessageUpdate::TextEnd });
                }
                ModelEvent::ThinkingDelta { text } => {
                    let _ = tx.send(AdapterEvent::MessageUpdate {
                        update: MessageUpdate::ThinkingDelta { text },
                    });
                }
                ModelEvent::ToolUse { id, name, input } => {
                    tool_calls.push((id, name, input));
                }
                ModelEvent::End { .. } => {}
            }
        }

        if tool_calls.is_empty() {
            let _ = tx.send(AdapterEvent::TurnEnd);
            break;
        }

        for (call_id, tool_name, input) in tool_calls {
            if inner.cancel.is_cancelled() {
                return Ok(PromptEnd::Aborted);
            }
            execute_tool(&inner, &tx, &call_id, &tool_name, input).await;
        }
    }

    let _ = tx.send(AdapterEvent::AgentEnd);
    Ok(PromptEnd::Finished)
}

/// Run one tool call end to end: start event, durable execution with the
/// suspension loop, end event, and the result message for the model.
async fn execute_tool(
    inner: &Arc<SessionInner>,
    tx: &mpsc::UnboundedSender<AdapterEvent>,
    call_id: &str,
    tool_name: &str,
    input: Value,
) {
    let _ = tx.send(AdapterEvent::ToolExecutionStart {
        tool_call_id: call_id.to_owned(),
        tool_name: tool_name.to_owned(),
        input: input.clone(),
    });
    inner
        .tool_call_times
        .lock()
        .insert(call_id.to_owned(), Instant::now());
    inner.tool_calls_total.fetch_add(1, Ordering::SeqCst);

    let outcome = run_tool(inner, tx, call_id, tool_name, &input).await;

    let (output, error, content) = match &outcome {
        ToolOutcome::Success { output, .. } => {
            let content = match output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (Some(output.clone()), None, content)
        }
        ToolOutcome::Error { error, .. } => (None, Some(error.clone()), error.clone()),
    };
    let is_error = outcome.is_error();

    let _ = tx.send(AdapterEvent::ToolExecutionEnd {
        tool_call_id: call_id.to_owned(),
        tool_name: tool_name.to_owned(),
        output,
        error,
    });
    inner.model.push_tool_result(call_id, tool_name, &content, is_error);
}

/// The durable execution loop for one tool call: run, and on suspension park
/// on a resolver, then replay from the start with memoized steps.
async fn run_tool(
    inner: &Arc<SessionInner>,
    tx: &mpsc::UnboundedSender<AdapterEvent>,
    call_id: &str,
    tool_name: &str,
    input: &Value,
) -> ToolOutcome {
    let Some(tool) = inner.tools.get(tool_name) else {
        return ToolOutcome::error(format!("unknown tool: {tool_name}"));
    };
    inner.tracker.begin(call_id, tool_name, input.clone());

    loop {
        let step_tx = tx.clone();
        let (step_call, step_tool) = (call_id.to_owned(), tool_name.to_owned());
        let on_step: muster_steps::StepEventFn = Arc::new(move |event: &muster_steps::StepEvent| {
            let progress = serde_json::to_value(event).unwrap_or(Value::Null);
            let _ = step_tx.send(AdapterEvent::ToolExecutionUpdate {
                tool_call_id: step_call.clone(),
                tool_name: step_tool.clone(),
                progress,
            });
        });
        let step = inner.tracker.step_context(call_id, Some(on_step));

        let progress_tx = tx.clone();
        let on_progress: ToolProgressFn = Arc::new(move |p: ToolProgress| {
            let _ = progress_tx.send(AdapterEvent::ToolExecutionUpdate {
                tool_call_id: p.tool_call_id,
                tool_name: p.tool_name,
                progress: p.progress,
            });
        });
        let ctx = ToolContext::new(
            inner.id.clone(),
            inner.guidance.clone(),
            inner.cancel.clone(),
            step,
            call_id,
            tool_name,
            Some(on_progress),
        );

        let result = tool.execute(input.clone(), &ctx).await;

        let recorded = ctx.step.take_recorded();
        if let Err(e) = inner.tracker.absorb(call_id, recorded) {
            return ToolOutcome::error(e.to_string());
        }

        match result {
            Ok(outcome) => {
                inner.tracker.clear_suspension(call_id);
                return outcome;
            }
            Err(StepError::Suspended(signal)) => {
                inner
                    .tracker
                    .record_suspension(call_id, &signal.step_id, signal.request.clone());
                let (res_tx, res_rx) = oneshot::channel();
                inner.resolvers.lock().insert(call_id.to_owned(), res_tx);
                {
                    let mut pending = inner.pending.lock();
                    pending.retain(|p| p.tool_call_id != call_id);
                    pending.push(PendingRequest {
                        tool_call_id: call_id.to_owned(),
                        tool_name: tool_name.to_owned(),
                        kind: signal.request.kind,
                        payload: signal.request.payload.clone(),
                        suspended_at: Utc::now(),
                    });
                }
                let requests = inner.pending.lock().clone();
                let _ = tx.send(AdapterEvent::SuspensionRaised { requests });

                // A resolution may have raced ahead of the park; if resume
                // data is already in place, replay immediately instead of
                // waiting on a resolver nobody will signal.
                if inner.tracker.has_resume(call_id) {
                    inner.resolvers.lock().remove(call_id);
                    inner.pending.lock().retain(|p| p.tool_call_id != call_id);
                    continue;
                }

                match res_rx.await {
                    Ok(ResolutionSignal::Resolved) => continue,
                    Ok(ResolutionSignal::Cancelled { reason }) => {
                        inner.tracker.clear_suspension(call_id);
                        let message = match reason {
                            Some(reason) => format!("suspension cancelled: {reason}"),
                            None => "suspension cancelled".into(),
                        };
                        return ToolOutcome::error(message);
                    }
                    Err(_) => {
                        // Resolver torn down by abort or terminate.
                        inner.tracker.clear_suspension(call_id);
                        return ToolOutcome::error("suspension abandoned");
                    }
                }
            }
            Err(StepError::Duplicate { step_id }) => {
                return ToolOutcome::error(format!("duplicate step '{step_id}'"));
            }
            Err(StepError::Cancelled { reason }) => {
                let message = match reason {
                    Some(reason) => format!("suspension cancelled: {reason}"),
                    None => "suspension cancelled".into(),
                };
                return ToolOutcome::error(message);
            }
            Err(StepError::Timeout) => {
                return ToolOutcome::error("suspension timed out");
            }
            Err(StepError::Failed(e)) => {
                return ToolOutcome::error(e.to_string());
            }
        }
    }
}
