//! Scripted adapter — the in-memory adapter used by tests and examples.
//!
//! Each `create`/`restore` consumes the next queued script and wires a
//! [`ScriptedModel`] into a [`SessionRuntime`]. Deterministic by design: the
//! model replays exactly the programmed rounds and echoes unanswered tool
//! calls after a restore.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use muster_adapter::codec::{MessageCodec, NativeCodec, NativeMessage};
use muster_adapter::scripted::{ScriptedModel, ScriptedRound};
use muster_adapter::traits::{AdapterCreateConfig, AgentAdapter, AgentInstance};
use muster_domain::{AgentCheckpoint, Result};

use crate::session::{SessionParams, SessionRuntime};

pub struct ScriptedAdapter {
    name: String,
    provider: String,
    model: String,
    scripts: Mutex<VecDeque<Vec<ScriptedRound>>>,
}

impl ScriptedAdapter {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            scripts: Mutex::new(VecDeque::new()),
        })
    }

    /// Queue the script for the next `create` or `restore` call.
    pub fn push_script(&self, rounds: Vec<ScriptedRound>) {
        self.scripts.lock().push_back(rounds);
    }

    fn next_script(&self) -> Vec<ScriptedRound> {
        self.scripts.lock().pop_front().unwrap_or_default()
    }

    /// The system message for a session: guidance bundle, skills index, and
    /// injected context, in that order.
    fn system_message(config: &AdapterCreateConfig) -> Option<NativeMessage> {
        let mut sections: Vec<String> = Vec::new();
        let guidance = config.guidance.system_prompt();
        if !guidance.is_empty() {
            sections.push(guidance);
        }
        if let Some(skills) = &config.skills {
            let index = skills.render_index();
            if !index.is_empty() {
                sections.push(index);
            }
        }
        if let Some(injection) = &config.context_injection {
            if let Some(system_context) = &injection.system_context {
                if !system_context.is_empty() {
                    sections.push(system_context.clone());
                }
            }
        }
        if sections.is_empty() {
            None
        } else {
            Some(NativeMessage::system(sections.join("\n\n")))
        }
    }

    fn params(&self, config: &AdapterCreateConfig, model: Arc<ScriptedModel>) -> SessionParams {
        SessionParams {
            session_id: config.session_id.clone(),
            adapter_name: self.name.clone(),
            model,
            tools: config.tools.clone(),
            guidance: config.guidance.clone(),
            limits: config.limits.clone(),
            task: config.task.clone(),
            parent_id: config.parent_id.clone(),
            tags: config.tags.clone(),
            metadata: config.metadata.clone(),
        }
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_provider(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn create(&self, config: AdapterCreateConfig) -> Result<Arc<dyn AgentInstance>> {
        let mut transcript = Vec::new();
        if let Some(system) = Self::system_message(&config) {
            transcript.push(system);
        }
        let model = Arc::new(ScriptedModel::with_transcript(transcript, self.next_script()));
        let input = config.input.clone();
        let runtime = SessionRuntime::new(self.params(&config, model), input);
        Ok(runtime as Arc<dyn AgentInstance>)
    }

    async fn restore(
        &self,
        checkpoint: AgentCheckpoint,
        config: AdapterCreateConfig,
    ) -> Result<Arc<dyn AgentInstance>> {
        let mut transcript = Vec::new();
        if let Some(system) = Self::system_message(&config) {
            transcript.push(system);
        }
        transcript.extend(NativeCodec.encode(&checkpoint.messages));
        if let Some(injection) = &config.context_injection {
            if let Some(resume) = &injection.resume_messages {
                transcript.extend(NativeCodec.encode(resume));
            }
        }

        let model = Arc::new(ScriptedModel::with_transcript(transcript, self.next_script()));
        let input = config.input.clone();
        let runtime = SessionRuntime::restored(self.params(&config, model), &checkpoint, input);
        Ok(runtime as Arc<dyn AgentInstance>)
    }
}
