//! Step context — memoized steps and typed suspensions.
//!
//! One [`StepContext`] accompanies exactly one tool invocation. It is seeded
//! with the steps completed by earlier runs of the same tool call and, after
//! a resolution, with the resume value for the suspended step.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use muster_domain::execution::{CompletedStep, ResumeData};
use muster_domain::suspend::{suspension_step_id, SuspensionKind, SuspensionRequest};
use muster_domain::Error;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors and signals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The suspension signal: a step cannot proceed without an external answer.
#[derive(Debug, Clone)]
pub struct SuspendedSignal {
    pub step_id: String,
    pub request: SuspensionRequest,
}

/// Error type for step operations.
///
/// `Suspended` is a control-flow signal, not a failure: it unwinds the tool
/// so the session can surface a pending request. Everything else fails the
/// tool call (and only the tool call).
#[derive(thiserror::Error, Debug)]
pub enum StepError {
    #[error("suspended on step '{}'", .0.step_id)]
    Suspended(Box<SuspendedSignal>),

    #[error("duplicate step '{step_id}' in one tool run")]
    Duplicate { step_id: String },

    #[error("suspension cancelled{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Cancelled { reason: Option<String> },

    #[error("suspension timed out")]
    Timeout,

    #[error(transparent)]
    Failed(#[from] Error),
}

pub type StepResult<T> = std::result::Result<T, StepError>;

/// Progress events emitted while a step context runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    StepStart { step_id: String },
    StepEnd { step_id: String },
    StepMemoized { step_id: String },
    Suspended { step_id: String, request: SuspensionRequest },
}

/// Callback invoked for every [`StepEvent`]. Surfaced by the session as tool
/// progress.
pub type StepEventFn = Arc<dyn Fn(&StepEvent) + Send + Sync>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StepContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation step state: prior results, the injected resume value, and
/// the steps observed in this run.
pub struct StepContext {
    tool_call_id: String,
    /// Results recorded by earlier runs of this tool call, by step id.
    completed: HashMap<String, Value>,
    /// Resolved value for the suspended step, consumed at most once.
    resume: Mutex<Option<ResumeData>>,
    /// Step ids executed (not memoized) in this run.
    seen: Mutex<HashSet<String>>,
    /// Steps newly completed in this run, in execution order.
    recorded: Mutex<Vec<CompletedStep>>,
    on_event: Option<StepEventFn>,
}

impl StepContext {
    pub fn new(
        tool_call_id: impl Into<String>,
        prior: &[CompletedStep],
        resume: Option<ResumeData>,
        on_event: Option<StepEventFn>,
    ) -> Self {
        let completed = prior
            .iter()
            .map(|s| (s.step_id.clone(), s.result.clone()))
            .collect();
        Self {
            tool_call_id: tool_call_id.into(),
            completed,
            resume: Mutex::new(resume),
            seen: Mutex::new(HashSet::new()),
            recorded: Mutex::new(Vec::new()),
            on_event,
        }
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// Run a named step exactly once.
    ///
    /// A step completed by an earlier run returns its recorded result without
    /// invoking `f`. A resolved suspension recorded under this exact step id
    /// returns the resolved value. Running the same step id twice in one run
    /// is a programming error. A suspension raised inside `f` propagates
    /// unchanged and records nothing.
    pub async fn run<T, F, Fut>(&self, step_id: &str, f: F) -> StepResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = StepResult<T>>,
    {
        if let Some(prior) = self.completed.get(step_id) {
            self.emit(StepEvent::StepMemoized { step_id: step_id.to_owned() });
            return decode(prior.clone());
        }

        if let Some(resume) = self.take_resume(step_id) {
            self.record(step_id, resume.result.clone());
            return decode(resume.result);
        }

        if !self.seen.lock().insert(step_id.to_owned()) {
            return Err(StepError::Duplicate { step_id: step_id.to_owned() });
        }

        self.emit(StepEvent::StepStart { step_id: step_id.to_owned() });
        let value = f().await?;
        let encoded = serde_json::to_value(&value).map_err(Error::Json)?;
        self.record(step_id, encoded);
        self.emit(StepEvent::StepEnd { step_id: step_id.to_owned() });
        Ok(value)
    }

    /// Suspend until a user answers with free-form input.
    pub fn wait_for_user_input(&self, payload: Value) -> StepResult<Value> {
        self.suspend_or_resume(SuspensionKind::UserInput, payload)
    }

    /// Suspend until a human approves or denies. Returns the decision.
    pub fn wait_for_approval(&self, payload: Value) -> StepResult<bool> {
        let value = self.suspend_or_resume(SuspensionKind::Approval, payload)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Suspend until a named external event fires. Returns the event payload.
    pub fn wait_for_event(&self, name: &str, options: Option<Value>) -> StepResult<Value> {
        let mut payload = serde_json::json!({ "event": name });
        if let Some(Value::Object(opts)) = options {
            for (k, v) in opts {
                payload[k] = v;
            }
        }
        self.suspend_or_resume(SuspensionKind::Event, payload)
    }

    /// Suspend for a wall-clock delay. The resolution is supplied by whoever
    /// schedules timers; the session does not run one itself.
    pub fn sleep(&self, duration_ms: u64) -> StepResult<()> {
        let resume_at = Utc::now() + chrono::Duration::milliseconds(duration_ms as i64);
        let payload = serde_json::json!({
            "duration_ms": duration_ms,
            "resume_at": resume_at,
        });
        self.suspend_or_resume(SuspensionKind::Sleep, payload)?;
        Ok(())
    }

    /// Steps newly completed in this run, in execution order.
    pub fn take_recorded(&self) -> Vec<CompletedStep> {
        std::mem::take(&mut self.recorded.lock())
    }

    // ── internals ──────────────────────────────────────────────────

    /// Either consume the injected resume value or raise a suspension under
    /// the sentinel step id shared by all waits of this tool call.
    fn suspend_or_resume(&self, kind: SuspensionKind, payload: Value) -> StepResult<Value> {
        let step_id = suspension_step_id(&self.tool_call_id);

        if let Some(resume) = self.take_resume(&step_id) {
            return Ok(resume.result);
        }

        let request = SuspensionRequest { kind, payload };
        self.emit(StepEvent::Suspended {
            step_id: step_id.clone(),
            request: request.clone(),
        });
        Err(StepError::Suspended(Box::new(SuspendedSignal { step_id, request })))
    }

    fn take_resume(&self, step_id: &str) -> Option<ResumeData> {
        let mut slot = self.resume.lock();
        if slot.as_ref().map(|r| r.step_id.as_str()) == Some(step_id) {
            slot.take()
        } else {
            None
        }
    }

    fn record(&self, step_id: &str, result: Value) {
        self.recorded.lock().push(CompletedStep {
            step_id: step_id.to_owned(),
            result,
            completed_at: Utc::now(),
        });
    }

    fn emit(&self, event: StepEvent) {
        if let Some(f) = &self.on_event {
            f(&event);
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> StepResult<T> {
    serde_json::from_value(value).map_err(|e| StepError::Failed(Error::Json(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(prior: &[CompletedStep], resume: Option<ResumeData>) -> StepContext {
        StepContext::new("tc_1", prior, resume, None)
    }

    fn completed(step_id: &str, result: Value) -> CompletedStep {
        CompletedStep {
            step_id: step_id.into(),
            result,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn run_executes_and_records() {
        let ctx = ctx(&[], None);
        let out: u32 = ctx.run("one", || async { Ok(7u32) }).await.unwrap();
        assert_eq!(out, 7);

        let recorded = ctx.take_recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].step_id, "one");
        assert_eq!(recorded[0].result, serde_json::json!(7));
    }

    #[tokio::test]
    async fn run_memoizes_prior_result_without_invoking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let prior = vec![completed("one", serde_json::json!(42))];
        let ctx = ctx(&prior, None);

        let calls2 = calls.clone();
        let out: u32 = ctx
            .run("one", move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                async { Ok(0u32) }
            })
            .await
            .unwrap();

        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "memoized step must not run");
        assert!(ctx.take_recorded().is_empty(), "memoized steps are not re-recorded");
    }

    #[tokio::test]
    async fn duplicate_step_in_one_run_fails() {
        let ctx = ctx(&[], None);
        let _: u32 = ctx.run("dup", || async { Ok(1u32) }).await.unwrap();
        let err = ctx.run::<u32, _, _>("dup", || async { Ok(2u32) }).await.unwrap_err();
        assert!(matches!(err, StepError::Duplicate { step_id } if step_id == "dup"));
    }

    #[tokio::test]
    async fn memoized_step_can_be_read_repeatedly() {
        let prior = vec![completed("one", serde_json::json!("x"))];
        let ctx = ctx(&prior, None);
        let a: String = ctx.run("one", || async { Ok(String::new()) }).await.unwrap();
        let b: String = ctx.run("one", || async { Ok(String::new()) }).await.unwrap();
        assert_eq!(a, "x");
        assert_eq!(b, "x");
    }

    #[tokio::test]
    async fn run_surfaces_fn_error_without_recording() {
        let ctx = ctx(&[], None);
        let err = ctx
            .run::<u32, _, _>("boom", || async {
                Err(StepError::Failed(Error::Other("exploded".into())))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exploded"));
        assert!(ctx.take_recorded().is_empty());
    }

    #[tokio::test]
    async fn suspension_inside_run_propagates_unrecorded() {
        let ctx = ctx(&[], None);
        let err = ctx
            .run::<Value, _, _>("outer", || async {
                ctx.wait_for_user_input(serde_json::json!({"prompt": "?"}))
            })
            .await
            .unwrap_err();
        match err {
            StepError::Suspended(sig) => assert_eq!(sig.step_id, "tc_1:suspended"),
            other => panic!("expected suspension, got {other}"),
        }
        assert!(ctx.take_recorded().is_empty());
    }

    #[test]
    fn wait_raises_typed_suspension() {
        let ctx = ctx(&[], None);
        let err = ctx
            .wait_for_approval(serde_json::json!({"action": "delete"}))
            .unwrap_err();
        match err {
            StepError::Suspended(sig) => {
                assert_eq!(sig.step_id, "tc_1:suspended");
                assert_eq!(sig.request.kind, SuspensionKind::Approval);
                assert_eq!(sig.request.payload["action"], "delete");
            }
            other => panic!("expected suspension, got {other}"),
        }
    }

    #[test]
    fn wait_consumes_resume_value() {
        let resume = ResumeData {
            step_id: "tc_1:suspended".into(),
            result: Value::Bool(true),
        };
        let ctx = ctx(&[], Some(resume));
        assert!(ctx.wait_for_approval(serde_json::json!({})).unwrap());

        // A second wait in the same run suspends again: resume is consumed.
        let err = ctx.wait_for_approval(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, StepError::Suspended(_)));
    }

    #[test]
    fn resume_for_other_step_is_ignored() {
        let resume = ResumeData {
            step_id: "tc_other:suspended".into(),
            result: Value::Bool(true),
        };
        let ctx = ctx(&[], Some(resume));
        let err = ctx.wait_for_user_input(Value::Null).unwrap_err();
        assert!(matches!(err, StepError::Suspended(_)));
    }

    #[tokio::test]
    async fn resume_data_answers_a_named_run_step() {
        let resume = ResumeData {
            step_id: "tc_1:suspended".into(),
            result: serde_json::json!("answered"),
        };
        let prior: Vec<CompletedStep> = Vec::new();
        let ctx = StepContext::new("tc_1", &prior, Some(resume), None);
        let out: String = ctx
            .run("tc_1:suspended", || async { Ok("never".to_string()) })
            .await
            .unwrap();
        assert_eq!(out, "answered");
        // Resolved run steps are appended to the record.
        let recorded = ctx.take_recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].step_id, "tc_1:suspended");
    }

    #[test]
    fn sleep_payload_carries_duration() {
        let ctx = ctx(&[], None);
        let err = ctx.sleep(1500).unwrap_err();
        match err {
            StepError::Suspended(sig) => {
                assert_eq!(sig.request.kind, SuspensionKind::Sleep);
                assert_eq!(sig.request.payload["duration_ms"], 1500);
                assert!(sig.request.payload["resume_at"].is_string());
            }
            other => panic!("expected suspension, got {other}"),
        }
    }

    #[test]
    fn wait_for_event_merges_options() {
        let ctx = ctx(&[], None);
        let err = ctx
            .wait_for_event("deploy_finished", Some(serde_json::json!({"timeout_ms": 5000})))
            .unwrap_err();
        match err {
            StepError::Suspended(sig) => {
                assert_eq!(sig.request.payload["event"], "deploy_finished");
                assert_eq!(sig.request.payload["timeout_ms"], 5000);
            }
            other => panic!("expected suspension, got {other}"),
        }
    }

    #[tokio::test]
    async fn step_events_fire_in_order() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let on_event: StepEventFn = Arc::new(move |ev: &StepEvent| {
            let label = match ev {
                StepEvent::StepStart { step_id } => format!("start:{step_id}"),
                StepEvent::StepEnd { step_id } => format!("end:{step_id}"),
                StepEvent::StepMemoized { step_id } => format!("memo:{step_id}"),
                StepEvent::Suspended { step_id, .. } => format!("suspend:{step_id}"),
            };
            seen2.lock().push(label);
        });

        let prior = vec![completed("a", serde_json::json!(1))];
        let ctx = StepContext::new("tc_1", &prior, None, Some(on_event));
        let _: u32 = ctx.run("a", || async { Ok(0u32) }).await.unwrap();
        let _: u32 = ctx.run("b", || async { Ok(2u32) }).await.unwrap();
        let _ = ctx.wait_for_user_input(Value::Null);

        assert_eq!(
            *seen.lock(),
            vec!["memo:a", "start:b", "end:b", "suspend:tc_1:suspended"]
        );
    }
}
