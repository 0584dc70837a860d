//! Per-session tool execution tracking.
//!
//! The tracker owns every [`ToolExecutionState`] of one session. It seeds
//! fresh step contexts for each (re-)run of a tool call, absorbs the steps
//! they complete, records suspensions, and injects resume data once a
//! resolution arrives. Its snapshot goes into the session checkpoint
//! verbatim.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use muster_domain::execution::{CompletedStep, ResumeData, SuspendedStep, ToolExecutionState};
use muster_domain::suspend::SuspensionRequest;

use crate::step::{StepContext, StepError, StepEventFn, StepResult};

/// Tracks tool execution state and pending resume data for one session.
#[derive(Default)]
pub struct ToolTracker {
    states: Mutex<HashMap<String, ToolExecutionState>>,
    resume: Mutex<HashMap<String, ResumeData>>,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a state record exists for this tool call. Keeps the existing
    /// record (with its completed steps) when the call is being replayed.
    pub fn begin(&self, tool_call_id: &str, tool_name: &str, input: Value) {
        self.states
            .lock()
            .entry(tool_call_id.to_owned())
            .or_insert_with(|| ToolExecutionState::new(tool_call_id, tool_name, input));
    }

    /// Build a fresh step context for one run of a tool call, seeded with the
    /// prior completed steps and any matching resume data (consumed here).
    pub fn step_context(&self, tool_call_id: &str, on_event: Option<StepEventFn>) -> StepContext {
        let prior = self
            .states
            .lock()
            .get(tool_call_id)
            .map(|s| s.completed_steps.clone())
            .unwrap_or_default();
        let resume = self.resume.lock().remove(tool_call_id);
        StepContext::new(tool_call_id, &prior, resume, on_event)
    }

    /// Merge steps newly completed by one run into the durable record.
    ///
    /// A collision with an already-recorded step id means the tool presented
    /// a diverging step sequence; that fails the tool call.
    pub fn absorb(&self, tool_call_id: &str, recorded: Vec<CompletedStep>) -> StepResult<()> {
        if recorded.is_empty() {
            return Ok(());
        }
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(tool_call_id) else {
            tracing::warn!(tool_call_id, "absorbing steps for unknown tool call");
            return Ok(());
        };
        for step in recorded {
            if state.has_step(&step.step_id) {
                return Err(StepError::Duplicate { step_id: step.step_id });
            }
            state.completed_steps.push(step);
        }
        Ok(())
    }

    /// Record the step a tool call is suspended on.
    pub fn record_suspension(
        &self,
        tool_call_id: &str,
        step_id: &str,
        request: SuspensionRequest,
    ) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(tool_call_id) {
            state.suspended_step = Some(SuspendedStep {
                step_id: step_id.to_owned(),
                request,
                suspended_at: Utc::now(),
            });
        }
    }

    /// Clear the suspended step after resolution, cancellation, or completion.
    pub fn clear_suspension(&self, tool_call_id: &str) {
        if let Some(state) = self.states.lock().get_mut(tool_call_id) {
            state.suspended_step = None;
        }
    }

    /// Inject the resolved value for a suspended step; the next step context
    /// built for this tool call consumes it.
    pub fn set_resume(&self, tool_call_id: &str, data: ResumeData) {
        self.resume.lock().insert(tool_call_id.to_owned(), data);
    }

    /// Whether unconsumed resume data exists for this tool call.
    pub fn has_resume(&self, tool_call_id: &str) -> bool {
        self.resume.lock().contains_key(tool_call_id)
    }

    /// All execution states, ordered by tool call id for determinism.
    pub fn snapshot(&self) -> Vec<ToolExecutionState> {
        let mut states: Vec<ToolExecutionState> = self.states.lock().values().cloned().collect();
        states.sort_by(|a, b| a.tool_call_id.cmp(&b.tool_call_id));
        states
    }

    /// Replace all state from a checkpoint.
    pub fn restore(&self, states: Vec<ToolExecutionState>) {
        let mut map = self.states.lock();
        map.clear();
        for state in states {
            map.insert(state.tool_call_id.clone(), state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_domain::suspend::SuspensionKind;

    fn step(step_id: &str, result: Value) -> CompletedStep {
        CompletedStep {
            step_id: step_id.into(),
            result,
            completed_at: Utc::now(),
        }
    }

    fn request() -> SuspensionRequest {
        SuspensionRequest {
            kind: SuspensionKind::Approval,
            payload: serde_json::json!({"action": "delete"}),
        }
    }

    #[test]
    fn begin_is_idempotent_across_replays() {
        let tracker = ToolTracker::new();
        tracker.begin("tc_1", "rm", serde_json::json!({"path": "/x"}));
        tracker.absorb("tc_1", vec![step("a", serde_json::json!(1))]).unwrap();

        // Replay of the same call keeps the recorded step.
        tracker.begin("tc_1", "rm", serde_json::json!({"path": "/x"}));
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].completed_steps.len(), 1);
    }

    #[tokio::test]
    async fn step_context_seeds_prior_steps() {
        let tracker = ToolTracker::new();
        tracker.begin("tc_1", "rm", Value::Null);
        tracker.absorb("tc_1", vec![step("a", serde_json::json!("done"))]).unwrap();

        // The seeded context serves "a" from the record.
        let ctx = tracker.step_context("tc_1", None);
        let out: String = ctx
            .run("a", || async { Ok("fresh".to_string()) })
            .await
            .unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn absorb_rejects_diverging_step_ids() {
        let tracker = ToolTracker::new();
        tracker.begin("tc_1", "rm", Value::Null);
        tracker.absorb("tc_1", vec![step("a", serde_json::json!(1))]).unwrap();

        let err = tracker
            .absorb("tc_1", vec![step("a", serde_json::json!(2))])
            .unwrap_err();
        assert!(matches!(err, StepError::Duplicate { step_id } if step_id == "a"));
    }

    #[test]
    fn suspension_lifecycle() {
        let tracker = ToolTracker::new();
        tracker.begin("tc_1", "rm", Value::Null);
        tracker.record_suspension("tc_1", "tc_1:suspended", request());

        let snapshot = tracker.snapshot();
        assert_eq!(
            snapshot[0].suspended_step.as_ref().unwrap().step_id,
            "tc_1:suspended"
        );

        tracker.clear_suspension("tc_1");
        assert!(tracker.snapshot()[0].suspended_step.is_none());
    }

    #[test]
    fn resume_data_is_consumed_by_next_context() {
        let tracker = ToolTracker::new();
        tracker.begin("tc_1", "rm", Value::Null);
        tracker.set_resume(
            "tc_1",
            ResumeData {
                step_id: "tc_1:suspended".into(),
                result: Value::Bool(true),
            },
        );

        let ctx = tracker.step_context("tc_1", None);
        assert!(ctx.wait_for_approval(Value::Null).unwrap());

        // Consumed: a second context sees no resume data.
        let ctx2 = tracker.step_context("tc_1", None);
        assert!(ctx2.wait_for_approval(Value::Null).is_err());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let tracker = ToolTracker::new();
        tracker.begin("tc_b", "echo", serde_json::json!({"x": 2}));
        tracker.begin("tc_a", "echo", serde_json::json!({"x": 1}));
        tracker.absorb("tc_a", vec![step("s", serde_json::json!(9))]).unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].tool_call_id, "tc_a");
        assert_eq!(snapshot[1].tool_call_id, "tc_b");

        let restored = ToolTracker::new();
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot().len(), 2);
        assert!(restored.snapshot()[0].has_step("s"));
    }

    #[test]
    fn absorb_unknown_call_is_tolerated() {
        let tracker = ToolTracker::new();
        tracker
            .absorb("tc_ghost", vec![step("a", Value::Null)])
            .unwrap();
        assert!(tracker.snapshot().is_empty());
    }
}
