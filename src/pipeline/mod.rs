//! Pipeline orchestrator wiring the layered pipeline — tool
//! selection, planning, control, output — on top of one context-builder
//! call per turn.

pub mod control;
pub mod inference;
pub mod output;
pub mod thinking;
pub mod tool_selector;

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::context::{self, ContextDataSource, ContextOptions};
use crate::memory::{
    ConversationEntry, Memory, MemoryEngine, MemoryError, MemoryKind, MemorySource, MemoryStatus,
    WorkspaceEntry,
};
use crate::types::{ContextTrigger, ControlAction, Plan, Request, ToolCall};

use control::{ControlOutcome, SkillIntent};
use inference::InferenceProvider;
use output::{ModelTurn, OutputResult, ToolHub};
use tool_selector::ToolCatalogEntry;

/// Errors from running the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The thinking layer's inference call failed outright.
    #[error("planning failed: {0}")]
    Planning(#[from] thinking::ThinkingError),
    /// The control layer's reasoning call failed.
    #[error("control evaluation failed: {0}")]
    Control(#[from] control::ControlError),
    /// The output layer's generation call failed.
    #[error("output generation failed: {0}")]
    Output(#[from] output::OutputError),
    /// A workspace entry could not be persisted.
    #[error("workspace write failed: {0}")]
    Workspace(#[from] MemoryError),
}

impl PipelineError {
    /// Which propagation-policy band this error falls into. Every variant
    /// here wraps an inference or storage call that already retried where
    /// its own contract allows, so the orchestrator treats the whole enum
    /// as transient I/O.
    pub fn propagation_policy(&self) -> crate::types::ErrorKind {
        crate::types::ErrorKind::TransientIo
    }
}

/// Final, non-streaming response from one orchestrator turn.
#[derive(Debug, Clone)]
pub struct FinalResponse {
    /// Assistant text, or an explanation when the control layer blocked.
    pub text: String,
    /// Control decision the turn resolved to.
    pub control_action: ControlAction,
    /// Section names the context builder contributed, for parity checks
    /// between `process` and `process_stream`.
    pub context_sources: Vec<String>,
    /// Tool calls made while producing `text`.
    pub tool_calls: Vec<ToolCall>,
    /// Structured reasoning steps from the control layer, present only for
    /// plans complex enough to skip the short-circuit.
    pub reasoning_steps: Vec<String>,
}

/// One event in the abstract streaming contract, stable across
/// transports. Variants with no payload in this crate still exist for
/// wire-format parity with downstream consumers.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A chunk of the thinking layer's output.
    ThinkingStream(String),
    /// Thinking layer finished.
    ThinkingDone,
    /// A chunk of sequential (multi-step) reasoning output.
    SeqThinkingStream(String),
    /// Sequential reasoning finished.
    SeqThinkingDone,
    /// A sequential reasoning run started.
    SequentialStart,
    /// One sequential reasoning step.
    SequentialStep(String),
    /// Sequential reasoning run finished.
    SequentialDone,
    /// The control decision for this turn.
    Control(crate::types::ControlDecision),
    /// A sandboxed container started.
    ContainerStart(String),
    /// A sandboxed container finished.
    ContainerDone(String),
    /// A new UI panel tab was created.
    PanelCreateTab(String),
    /// A UI panel was updated.
    PanelUpdate(String),
    /// A chunk of final assistant content.
    Content(String),
    /// A memory-layer side effect occurred.
    Memory(String),
    /// The turn finished.
    Done,
    /// The turn failed.
    Error(String),
}

/// Status of a deep (long-running) job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued, not yet started.
    Queued,
    /// Currently running.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
}

/// A deep job's full state, as returned by status polling.
#[derive(Debug, Clone)]
pub struct DeepJob {
    /// Job identifier returned to the caller at submission time.
    pub job_id: String,
    /// Current status.
    pub status: JobStatus,
    /// Wall-clock duration so far, in milliseconds.
    pub duration_ms: u64,
    /// Final result text, present once `status == Succeeded`.
    pub result: Option<String>,
    /// When the job was submitted, for duration bookkeeping.
    started_at: DateTime<Utc>,
}

/// In-memory deep-job registry. A real deployment would back this with a
/// durable queue; jobs here live only for the process lifetime.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, DeepJob>>,
}

impl JobStore {
    /// Submit a new job, returning its id.
    pub fn submit(&self, job_id: impl Into<String>) -> String {
        let job_id = job_id.into();
        self.jobs.write().expect("job store poisoned").insert(
            job_id.clone(),
            DeepJob {
                job_id: job_id.clone(),
                status: JobStatus::Queued,
                duration_ms: 0,
                result: None,
                started_at: Utc::now(),
            },
        );
        job_id
    }

    /// Mark a job running.
    pub fn mark_running(&self, job_id: &str) {
        if let Some(job) = self.jobs.write().expect("job store poisoned").get_mut(job_id) {
            job.status = JobStatus::Running;
        }
    }

    /// Mark a job complete, recording its result.
    pub fn complete(&self, job_id: &str, result: Result<String, String>) {
        let mut jobs = self.jobs.write().expect("job store poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            let elapsed = Utc::now().signed_duration_since(job.started_at);
            job.duration_ms = u64::try_from(elapsed.num_milliseconds().max(0)).unwrap_or(u64::MAX);
            match result {
                Ok(text) => {
                    job.status = JobStatus::Succeeded;
                    job.result = Some(text);
                }
                Err(_) => job.status = JobStatus::Failed,
            }
        }
    }

    /// Poll a job's current status.
    pub fn status(&self, job_id: &str) -> Option<DeepJob> {
        self.jobs.read().expect("job store poisoned").get(job_id).cloned()
    }
}

/// Pipeline orchestrator: the only caller of the context builder, exactly
/// once per turn.
pub struct Orchestrator<'a> {
    context_source: &'a dyn ContextDataSource,
    provider: &'a dyn InferenceProvider,
    tools: &'a dyn ToolHub,
    memory: &'a MemoryEngine,
    model: String,
    code_model: String,
    max_tool_loops: u32,
}

impl<'a> Orchestrator<'a> {
    /// Build an orchestrator over the given collaborators.
    pub fn new(
        context_source: &'a dyn ContextDataSource,
        provider: &'a dyn InferenceProvider,
        tools: &'a dyn ToolHub,
        memory: &'a MemoryEngine,
        model: impl Into<String>,
        code_model: impl Into<String>,
        max_tool_loops: u32,
    ) -> Self {
        Self {
            context_source,
            provider,
            tools,
            memory,
            model: model.into(),
            code_model: code_model.into(),
            max_tool_loops,
        }
    }

    /// Run one turn synchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage's inference call fails, or if a
    /// workspace entry cannot be persisted.
    pub async fn process(&self, request: &Request, turn: &dyn ModelTurn) -> Result<FinalResponse, PipelineError> {
        let query = request.last_user_text().unwrap_or_default();
        let trigger = detect_trigger(query);

        self.memory
            .save_workspace_entry(WorkspaceEntry::entry(
                &request.conversation_id,
                "user_message",
                "orchestrator",
                query,
            ))
            .await?;
        self.memory
            .save_conversation(ConversationEntry {
                session_id: request.conversation_id.clone(),
                role: "user".to_owned(),
                content: query.to_owned(),
                tokens_used: None,
            })
            .await?;

        if trigger == ContextTrigger::Remember {
            self.memory
                .save_memory(Memory {
                    id: None,
                    kind: MemoryKind::Fact,
                    content: query.to_owned(),
                    metadata: None,
                    status: MemoryStatus::Active,
                    source: MemorySource::User,
                    created_at: None,
                    updated_at: None,
                })
                .await?;
        }

        let context_decision = context::build_effective_context(
            self.context_source,
            request,
            trigger,
            request.context_mode(),
            ContextOptions::default(),
        )
        .await;

        let plan = thinking::plan(self.provider, &self.model, &context_decision.prompt_text, query).await?;

        let control_outcome: ControlOutcome =
            control::run_control(&plan, self.provider, &self.model, detect_skill_intent(&plan)).await?;

        if !matches!(control_outcome.decision.action, ControlAction::Approve | ControlAction::Warn) {
            if control_outcome.decision.action == ControlAction::Escalate {
                self.memory
                    .save_workspace_entry(WorkspaceEntry::approval_requested(
                        &request.conversation_id,
                        "control_layer",
                        &plan.intent,
                        &[],
                    ))
                    .await?;
            }
            return Ok(FinalResponse {
                text: control_outcome.decision.reasons.join("; "),
                control_action: control_outcome.decision.action,
                context_sources: context_decision.trace.context_sources,
                tool_calls: Vec::new(),
                reasoning_steps: control_outcome.reasoning_steps,
            });
        }

        let OutputResult { text, tool_calls, .. } = output::run_output(
            self.provider,
            &self.model,
            &self.code_model,
            &plan,
            &control_outcome.decision,
            turn,
            self.tools,
            self.max_tool_loops,
        )
        .await?;

        for call in &tool_calls {
            self.memory
                .save_workspace_entry(WorkspaceEntry::event(
                    &request.conversation_id,
                    "tool_result",
                    "output_layer",
                    call.result.clone().unwrap_or_default(),
                    serde_json::json!({"tool_name": call.tool_name, "status": call.status.to_string()}),
                ))
                .await?;
        }

        // Workspace write order per conversation: user_message, then each
        // tool_result, then the final assistant text.
        self.memory
            .save_workspace_entry(WorkspaceEntry::entry(
                &request.conversation_id,
                "final_assistant",
                "output_layer",
                text.clone(),
            ))
            .await?;
        self.memory
            .save_conversation(ConversationEntry {
                session_id: request.conversation_id.clone(),
                role: "assistant".to_owned(),
                content: text.clone(),
                tokens_used: None,
            })
            .await?;

        Ok(FinalResponse {
            text,
            control_action: control_outcome.decision.action,
            context_sources: context_decision.trace.context_sources,
            tool_calls,
            reasoning_steps: control_outcome.reasoning_steps,
        })
    }

    /// Run one turn as a stream of [`PipelineEvent`]s. Produces the same
    /// `context_sources` and final text as [`Orchestrator::process`] for
    /// the same request — it shares the same `process` call
    /// under the hood rather than re-deriving the turn.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as
    /// [`Orchestrator::process`].
    pub async fn process_stream(
        &self,
        request: &Request,
        turn: &dyn ModelTurn,
    ) -> Result<Vec<PipelineEvent>, PipelineError> {
        let mut events = vec![PipelineEvent::ThinkingStream(String::new()), PipelineEvent::ThinkingDone];

        let response = self.process(request, turn).await?;

        if !response.reasoning_steps.is_empty() {
            events.push(PipelineEvent::SequentialStart);
            for step in &response.reasoning_steps {
                events.push(PipelineEvent::SequentialStep(step.clone()));
            }
            events.push(PipelineEvent::SequentialDone);
        }

        events.push(PipelineEvent::Control(crate::types::ControlDecision {
            action: response.control_action,
            passed: matches!(response.control_action, ControlAction::Approve | ControlAction::Warn),
            source: "orchestrator".to_owned(),
            policy_version: "v1".to_owned(),
            reasons: Vec::new(),
        }));

        for call in &response.tool_calls {
            events.push(PipelineEvent::Memory(format!("tool_result:{}", call.tool_name)));
        }

        events.push(PipelineEvent::Content(response.text.clone()));
        events.push(PipelineEvent::Done);

        Ok(events)
    }
}

/// Narrow the planner's suggested tools down to a catalog shortlist
/// selection. Exposed at module level since it crosses the tool-selector
/// and thinking stages.
pub async fn select_tools_for_plan(
    provider: &dyn InferenceProvider,
    model: &str,
    plan: &Plan,
    catalog: &[ToolCatalogEntry],
) -> Result<Vec<String>, tool_selector::ToolSelectionError> {
    tool_selector::select_tools(provider, model, &plan.intent, catalog).await
}

/// Keyword scan mapping a user query onto the fixed JIT trigger set.
/// Precedence when several match: remember, then fact recall, then time
/// reference.
fn detect_trigger(query: &str) -> ContextTrigger {
    let q = query.to_ascii_lowercase();

    const REMEMBER_MARKERS: &[&str] = &["remember that", "remember this", "merke dir", "don't forget"];
    const RECALL_MARKERS: &[&str] = &["what did i", "did i tell you", "do you remember", "recall"];
    const TIME_MARKERS: &[&str] = &["yesterday", "today", "tomorrow", "last week", "this week", "this morning", "tonight"];

    if REMEMBER_MARKERS.iter().any(|m| q.contains(m)) {
        ContextTrigger::Remember
    } else if RECALL_MARKERS.iter().any(|m| q.contains(m)) {
        ContextTrigger::FactRecall
    } else if TIME_MARKERS.iter().any(|m| q.contains(m)) {
        ContextTrigger::TimeReference
    } else {
        ContextTrigger::None
    }
}

fn detect_skill_intent(plan: &Plan) -> Option<&SkillIntent> {
    // Plan-level skill intents are resolved by the caller (skill-create
    // requests arrive as dedicated API calls, not free-text turns); this
    // turn-level path never has a skill intent to check.
    let _ = plan;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryEngine;
    use crate::types::{HallucinationRisk, Message};
    use async_trait::async_trait;

    struct FixedSource;

    #[async_trait]
    impl ContextDataSource for FixedSource {
        async fn persona(&self) -> Option<String> {
            Some("persona".to_owned())
        }
        async fn now_facts(&self, _conversation_id: &str) -> Vec<String> {
            vec!["it is tuesday".to_owned()]
        }
        async fn rules(&self) -> Vec<String> {
            Vec::new()
        }
        async fn active_containers(&self, _conversation_id: &str) -> Vec<String> {
            Vec::new()
        }
        async fn selected_tools(&self, _request: &Request) -> Vec<String> {
            Vec::new()
        }
        async fn skills_catalog(&self) -> Vec<String> {
            Vec::new()
        }
        async fn relevant_facts(&self, _conversation_id: &str, _query: &str, _limit: usize) -> Vec<String> {
            Vec::new()
        }
        async fn recent_chat_history(&self, _conversation_id: &str, _limit: usize) -> Vec<String> {
            Vec::new()
        }
        async fn next_hints(&self, _conversation_id: &str) -> Vec<String> {
            Vec::new()
        }
        async fn jit_digest_events(&self, _conversation_id: &str, _window_hours: u32) -> Vec<String> {
            Vec::new()
        }
    }

    struct NoToolTurn;
    impl ModelTurn for NoToolTurn {
        fn next_turn(&self, _transcript: &str, _loop_index: u32) -> Option<output::ToolRequest> {
            None
        }
    }

    struct EchoTool;
    #[async_trait]
    impl ToolHub for EchoTool {
        async fn invoke(&self, tool_name: &str, _args: serde_json::Value) -> Result<String, String> {
            Ok(format!("ok:{tool_name}"))
        }
    }

    fn valid_plan_json() -> String {
        serde_json::json!({
            "intent": "greet",
            "suggested_tools": [],
            "needs_memory": false,
            "needs_chat_history": false,
            "needs_container": false,
            "container_name": null,
            "complexity": 1,
            "hallucination_risk": "low",
            "reasoning": "",
        })
        .to_string()
    }

    async fn memory_engine() -> MemoryEngine {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
        MemoryEngine::new(pool, None).await.expect("memory engine init")
    }

    fn request(text: &str) -> Request {
        Request {
            conversation_id: "c1".to_owned(),
            messages: vec![Message { role: "user".to_owned(), content: text.to_owned() }],
            model: None,
            stream: false,
            deep_job: false,
            response_mode: None,
        }
    }

    #[tokio::test]
    async fn process_and_process_stream_share_context_sources_and_text() {
        let memory = memory_engine().await;
        let provider = inference::ScriptedProvider::new(vec![valid_plan_json(), "hello there".to_owned()]);
        let source = FixedSource;
        let tools = EchoTool;
        let orchestrator = Orchestrator::new(&source, &provider, &tools, &memory, "m", "code-m", 6);

        let sync_result = orchestrator.process(&request("hi"), &NoToolTurn).await.unwrap();

        let provider2 = inference::ScriptedProvider::new(vec![valid_plan_json(), "hello there".to_owned()]);
        let orchestrator2 = Orchestrator::new(&source, &provider2, &tools, &memory, "m", "code-m", 6);
        let stream_events = orchestrator2.process_stream(&request("hi"), &NoToolTurn).await.unwrap();

        let content = stream_events.iter().find_map(|e| match e {
            PipelineEvent::Content(text) => Some(text.clone()),
            _ => None,
        });
        assert_eq!(content, Some(sync_result.text));
    }

    #[test]
    fn trigger_detection_maps_query_phrases_onto_the_fixed_set() {
        assert_eq!(detect_trigger("remember that my car is blue"), ContextTrigger::Remember);
        assert_eq!(detect_trigger("what did I say about the car"), ContextTrigger::FactRecall);
        assert_eq!(detect_trigger("what happened yesterday"), ContextTrigger::TimeReference);
        assert_eq!(detect_trigger("how tall is the eiffel tower"), ContextTrigger::None);
        // Precedence: remember wins over a time reference in the same query.
        assert_eq!(
            detect_trigger("remember that tomorrow is a holiday"),
            ContextTrigger::Remember
        );
    }

    #[test]
    fn job_store_tracks_lifecycle() {
        let store = JobStore::default();
        let id = store.submit("job-1");
        assert_eq!(store.status(&id).unwrap().status, JobStatus::Queued);
        store.mark_running(&id);
        assert_eq!(store.status(&id).unwrap().status, JobStatus::Running);
        store.complete(&id, Ok("done".to_owned()));
        let final_state = store.status(&id).unwrap();
        assert_eq!(final_state.status, JobStatus::Succeeded);
        assert_eq!(final_state.result, Some("done".to_owned()));
    }

    #[tokio::test]
    async fn low_risk_plan_skips_tool_loop_reasoning_and_returns_text() {
        let memory = memory_engine().await;
        let provider = inference::ScriptedProvider::new(vec![valid_plan_json(), "hi back".to_owned()]);
        let source = FixedSource;
        let tools = EchoTool;
        let orchestrator = Orchestrator::new(&source, &provider, &tools, &memory, "m", "code-m", 6);

        let result = orchestrator.process(&request("hi"), &NoToolTurn).await.unwrap();
        assert_eq!(result.control_action, ControlAction::Approve);
        assert!(result.tool_calls.is_empty());
        let _ = HallucinationRisk::Low;
    }
}
