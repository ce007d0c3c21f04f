//! Context builder: the single place that assembles an LLM prompt from
//! multiple sources under a hard character budget.
//!
//! [`build_effective_context`] is the only public entry point. No other
//! component may compose prompt context from more than one source —
//! the layered pipeline and the orchestrator both call through here.

pub mod engine_source;
pub mod sections;

use async_trait::async_trait;

use crate::types::{ContextDecision, ContextMode, ContextTrace, ContextTrigger, Request};

/// Hard character budget for the assembled prompt, when not overridden by
/// [`crate::config::ContextConfig::final_cap`].
pub const DEFAULT_FINAL_CAP: usize = 24_000;

/// Errors from context assembly.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A section renderer raised an exception. The caller falls back to a
    /// minimal NOW block rather than propagating this.
    #[error("renderer failed for section {section}: {reason}")]
    RendererFailed {
        /// Name of the section whose renderer failed.
        section: &'static str,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl ContextError {
    /// Which propagation-policy band this error falls into.
    pub fn propagation_policy(&self) -> crate::types::ErrorKind {
        crate::types::ErrorKind::TransientIo
    }
}

/// External data a context assembly needs. Each method treats its own
/// retrieval failure as "no contribution" rather than propagating an error —
/// per the component's failure semantics, a missing source is never fatal.
#[async_trait]
pub trait ContextDataSource: Send + Sync {
    /// System persona text from the external persona store.
    async fn persona(&self) -> Option<String>;

    /// Latest facts and short-term observations for the NOW block.
    async fn now_facts(&self, conversation_id: &str) -> Vec<String>;

    /// Policy reminders for the RULES block.
    async fn rules(&self) -> Vec<String>;

    /// Containers started and not yet stopped today, for this conversation.
    async fn active_containers(&self, conversation_id: &str) -> Vec<String>;

    /// Tool names selected by the tool selector for this request.
    async fn selected_tools(&self, request: &Request) -> Vec<String>;

    /// The skills catalog, rendered through the typed-state renderer.
    async fn skills_catalog(&self) -> Vec<String>;

    /// Bounded top-k relevant facts / graph neighbors.
    async fn relevant_facts(&self, conversation_id: &str, query: &str, limit: usize) -> Vec<String>;

    /// Bounded recent chat history.
    async fn recent_chat_history(&self, conversation_id: &str, limit: usize) -> Vec<String>;

    /// NEXT-block typed-state hints.
    async fn next_hints(&self, conversation_id: &str) -> Vec<String>;

    /// CSV digest events within the given JIT window, in hours.
    async fn jit_digest_events(&self, conversation_id: &str, window_hours: u32) -> Vec<String>;
}

/// Fixed triggers JIT-loading is allowed for, and their lookback windows.
///
/// The window is a rolling hour count from the moment of the request, not a
/// calendar-day cutoff, so a request near local midnight sees the same
/// continuous lookback as one at any other hour — "today" never truncates
/// the window early and "yesterday" is never excluded just because a
/// calendar day boundary sits between the two. Digest cycle boundaries
/// (local midnight, see `digest::scheduler`) are a separate concern from
/// this lookback and do not need to agree with it.
fn jit_window_hours(trigger: ContextTrigger, jit_only: bool, windows: JitWindows) -> Option<u32> {
    if !jit_only {
        // JIT_ONLY=false means CSV events load regardless of trigger, using
        // the widest configured window.
        return Some(
            windows
                .time_reference_h
                .max(windows.fact_recall_h)
                .max(windows.remember_h),
        );
    }
    match trigger {
        ContextTrigger::TimeReference => Some(windows.time_reference_h),
        ContextTrigger::FactRecall => Some(windows.fact_recall_h),
        ContextTrigger::Remember => Some(windows.remember_h),
        ContextTrigger::None => None,
    }
}

/// JIT lookback windows, hours, per trigger (config-sourced).
#[derive(Debug, Clone, Copy)]
pub struct JitWindows {
    /// Window for the `time_reference` trigger.
    pub time_reference_h: u32,
    /// Window for the `fact_recall` trigger.
    pub fact_recall_h: u32,
    /// Window for the `remember` trigger.
    pub remember_h: u32,
}

impl Default for JitWindows {
    fn default() -> Self {
        Self {
            time_reference_h: 48,
            fact_recall_h: 168,
            remember_h: 336,
        }
    }
}

/// Assembly options, sourced from [`crate::config::ContextConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Hard character cap for the assembled prompt.
    pub final_cap: usize,
    /// Whether CSV digest events are gated by trigger at all.
    pub jit_only: bool,
    /// Per-trigger JIT lookback windows.
    pub jit_windows: JitWindows,
    /// Bound on relevant-facts retrieval.
    pub relevant_facts_limit: usize,
    /// Bound on recent chat history retrieval.
    pub chat_history_limit: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            final_cap: DEFAULT_FINAL_CAP,
            jit_only: true,
            jit_windows: JitWindows::default(),
            relevant_facts_limit: 12,
            chat_history_limit: 20,
        }
    }
}

/// Assemble a single prompt from all sources, applying dedupe, selection,
/// and a hard character cap.
///
/// This is the crate's single public operation for prompt assembly:
/// no other component may compose a prompt from more than one source.
pub async fn build_effective_context(
    source: &dyn ContextDataSource,
    request: &Request,
    trigger: ContextTrigger,
    mode: ContextMode,
    opts: ContextOptions,
) -> ContextDecision {
    let conversation_id = request.conversation_id.as_str();
    let query = request.last_user_text().unwrap_or_default();

    let mut sections = Vec::new();

    // The persona counts against the cap like everything after it, so the
    // final text can never exceed the budget by the persona's length.
    if let Some(persona) = source.persona().await {
        sections.push(sections::Section::new(
            "persona",
            sections::DropPriority::Never,
            persona,
        ));
    }

    match sections::render_now(source, conversation_id).await {
        Ok(text) => sections.push(sections::Section::new("now", sections::DropPriority::Last, text)),
        Err(_) => sections.push(sections::Section::new(
            "now",
            sections::DropPriority::Last,
            sections::MINIMAL_NOW.to_owned(),
        )),
    }

    let rules = source.rules().await;
    sections.push(sections::Section::new(
        "rules",
        sections::DropPriority::Fifth,
        sections::render_rules(&rules),
    ));

    let containers = source.active_containers(conversation_id).await;
    if !containers.is_empty() {
        sections.push(sections::Section::new(
            "active_containers",
            sections::DropPriority::Never,
            sections::render_list("Active containers", &containers),
        ));
    }

    if !matches!(mode, ContextMode::FailureCompact) {
        let tools = source.selected_tools(request).await;
        if !tools.is_empty() {
            sections.push(sections::Section::new(
                "tools",
                sections::DropPriority::Fourth,
                sections::render_list("Available tools", &tools),
            ));
        }

        let skills = source.skills_catalog().await;
        if !skills.is_empty() {
            sections.push(sections::Section::new(
                "skills",
                sections::DropPriority::Third,
                sections::render_list("Skills", &skills),
            ));
        }

        let facts = sections::dedupe(
            source
                .relevant_facts(conversation_id, query, opts.relevant_facts_limit)
                .await,
        );
        let facts = sections::select_top(facts, opts.relevant_facts_limit);
        if !facts.is_empty() {
            sections.push(sections::Section::new(
                "facts",
                sections::DropPriority::Second,
                sections::render_list("Relevant facts", &facts),
            ));
        }

        let history = source
            .recent_chat_history(conversation_id, opts.chat_history_limit)
            .await;
        if !history.is_empty() {
            sections.push(sections::Section::new(
                "chat_history",
                sections::DropPriority::First,
                sections::render_list("Recent conversation", &history),
            ));
        }
    }

    if let Some(window_h) = jit_window_hours(trigger, opts.jit_only, opts.jit_windows) {
        let jit_events = source.jit_digest_events(conversation_id, window_h).await;
        if !jit_events.is_empty() {
            sections.push(sections::Section::new(
                "jit_digest",
                sections::DropPriority::Second,
                sections::render_list("Recent digest events", &jit_events),
            ));
        }
    }

    let next_hints = source.next_hints(conversation_id).await;
    sections.push(sections::Section::new(
        "next",
        sections::DropPriority::Never,
        sections::render_next(&next_hints),
    ));

    let retrieval_count = sections.len();
    let context_sources: Vec<String> = sections.iter().map(|s| s.name.to_owned()).collect();

    let (prompt_text, truncated) = sections::hard_cap(sections, opts.final_cap);

    let context_chars_final = prompt_text.chars().count();

    // The one-line marker both the sync and streaming paths share, since
    // both arrive through this single entry point.
    tracing::info!(
        mode = ?mode,
        trigger = %trigger,
        sources = context_sources.len(),
        chars = context_chars_final,
        truncated,
        "context assembled"
    );

    ContextDecision {
        prompt_text,
        trace: ContextTrace {
            mode,
            context_sources,
            context_chars_final,
            retrieval_count,
            flags: crate::types::ContextFlags {
                skills_prefetch_used: false,
                detection_rules_used: !rules.is_empty(),
                output_reinjection_risk: false,
                truncated,
            },
        },
    }
}
