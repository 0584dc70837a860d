//! Shared fixtures for the runtime integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use muster_domain::{AgentInput, CoordinatorEvent};
use muster_runtime::{Coordinator, CoordinatorConfig, EventStream, SpawnConfig};
use muster_steps::StepResult;
use muster_store::MemorySnapshotStore;
use muster_tools::{Tool, ToolContext, ToolOutcome, ToolRegistry};
use tempfile::TempDir;

// ── Tools ──────────────────────────────────────────────────────────

/// Echoes its input back as the tool output.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echo the input back"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, input: Value, _ctx: &ToolContext) -> StepResult<ToolOutcome> {
        Ok(ToolOutcome::success(input))
    }
}

/// Runs a memoized "prepare" step, then waits for human approval.
pub struct ApprovalTool {
    pub prepared: Arc<AtomicUsize>,
}

impl ApprovalTool {
    pub fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let prepared = Arc::new(AtomicUsize::new(0));
        (Arc::new(Self { prepared: prepared.clone() }), prepared)
    }
}

#[async_trait]
impl Tool for ApprovalTool {
    fn name(&self) -> &str {
        "rm"
    }
    fn description(&self) -> &str {
        "Delete something, after approval"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    fn can_suspend(&self) -> bool {
        true
    }
    async fn execute(&self, _input: Value, ctx: &ToolContext) -> StepResult<ToolOutcome> {
        let prepared = self.prepared.clone();
        let _ready: String = ctx
            .step
            .run("prepare", || async move {
                prepared.fetch_add(1, Ordering::SeqCst);
                Ok("ready".to_string())
            })
            .await?;

        let approved = ctx
            .step
            .wait_for_approval(json!({"action": "delete", "description": "?"}))?;
        Ok(ToolOutcome::success(json!({"approved": approved})))
    }
}

/// A buggy tool that reuses one step id in a single run.
pub struct DuplicateStepTool;

#[async_trait]
impl Tool for DuplicateStepTool {
    fn name(&self) -> &str {
        "buggy"
    }
    fn description(&self) -> &str {
        "Reuses a step id"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _input: Value, ctx: &ToolContext) -> StepResult<ToolOutcome> {
        let _: u32 = ctx.step.run("same", || async { Ok(1u32) }).await?;
        let _: u32 = ctx.step.run("same", || async { Ok(2u32) }).await?;
        Ok(ToolOutcome::success(Value::Null))
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

pub struct Fixture {
    pub coordinator: Coordinator,
    pub store: Arc<MemorySnapshotStore>,
    pub guidance: TempDir,
}

/// Install a test subscriber once so `RUST_LOG` filters test output.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A running coordinator with a memory snapshot store and an empty guidance
/// directory.
pub fn fixture() -> Fixture {
    init_tracing();
    let guidance = TempDir::new().unwrap();
    let store = Arc::new(MemorySnapshotStore::new());
    let coordinator = Coordinator::new(CoordinatorConfig {
        snapshot_store: Some(store.clone()),
        default_guidance_path: Some(guidance.path().to_path_buf()),
        ..Default::default()
    })
    .unwrap();
    coordinator.start().unwrap();
    Fixture { coordinator, store, guidance }
}

pub fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    Arc::new(registry)
}

pub fn spawn_config(message: &str, tools: Arc<ToolRegistry>) -> SpawnConfig {
    SpawnConfig {
        input: Some(AgentInput::message(message)),
        tools,
        metadata: BTreeMap::new(),
        ..Default::default()
    }
}

// ── Event collection ───────────────────────────────────────────────

/// Drain coordinator events until (and including) `agent_done`, with a
/// safety timeout.
pub async fn collect_until_done(
    mut events: EventStream<CoordinatorEvent>,
) -> Vec<CoordinatorEvent> {
    use futures_util::StreamExt;

    let mut collected = Vec::new();
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.next().await {
            let done = matches!(event, CoordinatorEvent::AgentDone { .. });
            collected.push(event);
            if done {
                break;
            }
        }
    });
    deadline.await.expect("timed out waiting for agent_done");
    collected
}

/// Compact labels for asserting event sequences.
pub fn label(event: &CoordinatorEvent) -> String {
    use muster_domain::AgentEvent;

    match event {
        CoordinatorEvent::AgentSpawned { .. } => "agent_spawned".into(),
        CoordinatorEvent::AgentDone { .. } => "agent_done".into(),
        CoordinatorEvent::AgentEvent { event, .. } => match event {
            AgentEvent::Status { status } => format!("status:{status}"),
            AgentEvent::Output { text, is_final } => {
                format!("output:{}:{}", text, if *is_final { "final" } else { "delta" })
            }
            AgentEvent::Thought { .. } => "thought".into(),
            AgentEvent::ToolStart { tool_name, .. } => format!("tool_start:{tool_name}"),
            AgentEvent::ToolProgress { .. } => "tool_progress".into(),
            AgentEvent::ToolEnd { tool_name, error, .. } => {
                if error.is_some() {
                    format!("tool_end_err:{tool_name}")
                } else {
                    format!("tool_end:{tool_name}")
                }
            }
            AgentEvent::Suspended { .. } => "suspended".into(),
            AgentEvent::Error { .. } => "error".into(),
            AgentEvent::Done { .. } => "done".into(),
        },
    }
}
