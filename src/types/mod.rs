//! Shared wire types passed between the context builder, the layered
//! pipeline, and the skill authority.
//!
//! Each enum follows the same roundtrip contract: `Display` renders the
//! canonical lowercase form, `FromStr` parses it back case-insensitively,
//! and an invalid string is a named error rather than a silent default.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message in the conversation submitted with a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message text.
    pub content: String,
}

/// One user turn handed to the orchestrator. Transient — lives for the
/// duration of a single orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Conversation this request belongs to.
    pub conversation_id: String,
    /// Full message history up to and including the new user turn.
    pub messages: Vec<Message>,
    /// Requested model identifier, if the caller pinned one.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the caller wants a streaming response.
    #[serde(default)]
    pub stream: bool,
    /// Whether this request should be queued as a deep (long-running) job.
    #[serde(default)]
    pub deep_job: bool,
    /// Requested context-assembly mode; unrecognized or absent values fall
    /// back to the full mode.
    #[serde(default)]
    pub response_mode: Option<String>,
}

impl Request {
    /// The most recent user-authored message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
    }

    /// The [`ContextMode`] this request asks for.
    pub fn context_mode(&self) -> ContextMode {
        match self.response_mode.as_deref() {
            Some("small_model") => ContextMode::SmallModel,
            Some("failure_compact") => ContextMode::FailureCompact,
            _ => ContextMode::Full,
        }
    }
}

/// Hallucination-risk band produced by the thinking layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HallucinationRisk {
    /// Low risk — control layer may short-circuit deep reasoning.
    Low,
    /// Medium risk — the safe default when planning fails.
    Med,
    /// High risk — always routes through full control reasoning.
    High,
}

impl fmt::Display for HallucinationRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for HallucinationRisk {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "med" | "medium" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(ParseEnumError {
                field: "hallucination_risk",
                value: other.to_owned(),
            }),
        }
    }
}

/// Output of the thinking (planner) layer. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Free-text intent summary.
    pub intent: String,
    /// Tool names the planner believes are relevant, in priority order.
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    /// Whether answering needs a memory/fact lookup.
    pub needs_memory: bool,
    /// Whether answering needs recent chat history.
    pub needs_chat_history: bool,
    /// Whether answering needs a running container.
    #[serde(default)]
    pub needs_container: bool,
    /// Container name, present only when `needs_container`.
    #[serde(default)]
    pub container_name: Option<String>,
    /// Subjective complexity, 1 (trivial) to 10 (deep multi-step).
    pub complexity: u8,
    /// Planner's self-assessed hallucination risk.
    pub hallucination_risk: HallucinationRisk,
    /// Short free-text justification, logged but never shown to the user.
    #[serde(default)]
    pub reasoning: String,
}

impl Plan {
    /// The fail-safe plan returned when the planner's JSON output cannot be
    /// parsed even after one retry (contract in `pipeline::thinking`).
    pub fn safe_default() -> Self {
        Self {
            intent: String::new(),
            suggested_tools: Vec::new(),
            needs_memory: false,
            needs_chat_history: false,
            needs_container: false,
            container_name: None,
            complexity: 1,
            hallucination_risk: HallucinationRisk::Med,
            reasoning: "planner output unparsable; safe default applied".to_owned(),
        }
    }
}

/// Action recommended by a `ControlDecision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Proceed without restriction.
    Approve,
    /// Proceed, but the decision carries a caveat worth surfacing.
    Warn,
    /// Refuse outright.
    Block,
    /// Hold for explicit user approval before proceeding.
    Escalate,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approve => "approve",
            Self::Warn => "warn",
            Self::Block => "block",
            Self::Escalate => "escalate",
        };
        f.write_str(s)
    }
}

impl FromStr for ControlAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "warn" => Ok(Self::Warn),
            "block" => Ok(Self::Block),
            "escalate" => Ok(Self::Escalate),
            other => Err(ParseEnumError {
                field: "control_action",
                value: other.to_owned(),
            }),
        }
    }
}

/// Decision produced by the control layer or the skill authority.
///
/// Fail-closed by construction: [`ControlDecision::fail_closed`] is the
/// only way to build a decision that callers should treat as a block, and
/// [`ControlDecision::is_actionable`] is the single predicate every caller
/// must consult instead of re-deriving this check ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlDecision {
    /// What the decision recommends.
    pub action: ControlAction,
    /// Whether the underlying checks passed. `action` alone is not enough —
    /// a decision with `action=approve, passed=false` is still a block.
    pub passed: bool,
    /// Tag identifying which authority produced this decision
    /// (e.g. `"skill_server"`, `"control_layer"`).
    pub source: String,
    /// Policy/ruleset version that produced this decision.
    pub policy_version: String,
    /// Human-readable reasons, most specific first.
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl ControlDecision {
    /// Build a decision that every caller will treat as fail-closed: no
    /// action is ever allowed through a missing or malformed decision.
    pub fn fail_closed(source: &str, reason: impl Into<String>) -> Self {
        Self {
            action: ControlAction::Block,
            passed: false,
            source: source.to_owned(),
            policy_version: "unknown".to_owned(),
            reasons: vec![reason.into()],
        }
    }

    /// Whether this decision authorizes proceeding from the named
    /// authority. Per the skill authority's contract the
    /// decision must be `passed==true`, `action` in `{approve, warn}`, and
    /// `source` must match the expected authority tag exactly.
    pub fn is_actionable(&self, expected_source: &str) -> bool {
        self.passed
            && matches!(self.action, ControlAction::Approve | ControlAction::Warn)
            && self.source == expected_source
    }
}

/// Status of one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// The tool ran and returned a result.
    Success,
    /// The tool ran and failed, or could not be dispatched.
    Error,
    /// The tool call is held pending user approval.
    PendingApproval,
}

impl fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::PendingApproval => "pending_approval",
        };
        f.write_str(s)
    }
}

/// One tool invocation made during the output layer's tool loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments passed to the tool, as submitted by the model.
    pub args: serde_json::Value,
    /// Result text, present when `status == Success`.
    #[serde(default)]
    pub result: Option<String>,
    /// Error text, present when `status == Error`.
    #[serde(default)]
    pub error: Option<String>,
    /// Outcome of this invocation.
    pub status: ToolCallStatus,
    /// Container id the tool executed in, if sandboxed.
    #[serde(default)]
    pub container_id: Option<String>,
}

/// Propagation-policy band an error falls into. Each typed error enum maps
/// its variants onto exactly one band via `propagation_policy()`, so
/// callers decide retry/fail-closed/surface behavior generically instead
/// of re-deriving it per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retry with capped backoff; fail-closed only when safety-relevant,
    /// otherwise degrade to an empty contribution.
    TransientIo,
    /// One retry for LLM output, drop-with-log for data.
    Parse,
    /// Surface to the user as `pending_*`/`rejected`; never retried.
    PolicyBlock,
    /// Reject immediately with the authority reason code.
    AuthorityViolation,
    /// Skip the contended cycle, record `reason=locked`.
    LockContention,
    /// Return null/error to the caller; no silent target substitution.
    HardRoutingError,
    /// Refuse to start.
    FatalConfig,
}

/// Failure to parse a canonical enum string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {field}: {value:?}")]
pub struct ParseEnumError {
    /// Name of the field being parsed, for error context.
    pub field: &'static str,
    /// The offending raw value.
    pub value: String,
}

/// Fixed trigger set gating JIT loading of CSV digest events in the
/// context builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTrigger {
    /// The user referenced a relative or absolute time ("yesterday", "at 3pm").
    TimeReference,
    /// The user asked the assistant to remember something.
    Remember,
    /// The user asked the assistant to recall a previously stored fact.
    FactRecall,
    /// No JIT-relevant trigger detected.
    None,
}

impl fmt::Display for ContextTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TimeReference => "time_reference",
            Self::Remember => "remember",
            Self::FactRecall => "fact_recall",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// Prompt-assembly mode requested of the context builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Full section set, normal budget.
    Full,
    /// Reduced prompt tuned for a smaller/cheaper model.
    SmallModel,
    /// Minimal prompt used after a renderer failure.
    FailureCompact,
}

/// Observability flags attached to a [`ContextTrace`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextFlags {
    /// Whether the skills catalog was prefetched rather than rendered live.
    #[serde(default)]
    pub skills_prefetch_used: bool,
    /// Whether detection-rule output shaped section selection.
    #[serde(default)]
    pub detection_rules_used: bool,
    /// Whether tool/section output risks being re-injected into the prompt.
    #[serde(default)]
    pub output_reinjection_risk: bool,
    /// Whether the hard-cap forced a tail-truncation of the final section.
    #[serde(default)]
    pub truncated: bool,
}

/// Observability record produced alongside the assembled prompt text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTrace {
    /// Assembly mode used.
    pub mode: ContextMode,
    /// Section names actually contributing content, in assembly order.
    pub context_sources: Vec<String>,
    /// Final character length of the assembled prompt.
    pub context_chars_final: usize,
    /// Number of retrieved candidate items before selection/capping.
    pub retrieval_count: usize,
    /// Diagnostic flags.
    pub flags: ContextFlags,
}

/// Output of [`crate::context::build_effective_context`]: the assembled
/// prompt plus its trace. Immutable once produced (the prompt
/// text never exceeds the configured character cap).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDecision {
    /// Assembled prompt text, ready to hand to the inference layer.
    pub prompt_text: String,
    /// Observability trace for this assembly.
    pub trace: ContextTrace,
}

/// A timestamped marker used across components that need a stable
/// `created_at` for ordering (workspace entries, digest cycles).
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hallucination_risk_roundtrip() {
        for risk in [
            HallucinationRisk::Low,
            HallucinationRisk::Med,
            HallucinationRisk::High,
        ] {
            let s = risk.to_string();
            assert_eq!(HallucinationRisk::from_str(&s).unwrap(), risk);
        }
    }

    #[test]
    fn hallucination_risk_case_insensitive() {
        assert_eq!(
            HallucinationRisk::from_str("HIGH").unwrap(),
            HallucinationRisk::High
        );
        assert_eq!(
            HallucinationRisk::from_str("Medium").unwrap(),
            HallucinationRisk::Med
        );
    }

    #[test]
    fn hallucination_risk_invalid() {
        assert!(HallucinationRisk::from_str("extreme").is_err());
    }

    #[test]
    fn control_action_roundtrip() {
        for action in [
            ControlAction::Approve,
            ControlAction::Warn,
            ControlAction::Block,
            ControlAction::Escalate,
        ] {
            assert_eq!(ControlAction::from_str(&action.to_string()).unwrap(), action);
        }
    }

    #[test]
    fn control_decision_fail_closed_is_never_actionable() {
        let decision = ControlDecision::fail_closed("skill_server", "missing decision");
        assert!(!decision.is_actionable("skill_server"));
    }

    #[test]
    fn control_decision_source_mismatch_blocks() {
        let decision = ControlDecision {
            action: ControlAction::Approve,
            passed: true,
            source: "legacy_dual".to_owned(),
            policy_version: "1".to_owned(),
            reasons: Vec::new(),
        };
        assert!(!decision.is_actionable("skill_server"));
        assert!(decision.is_actionable("legacy_dual"));
    }

    #[test]
    fn control_decision_wrong_action_blocks() {
        let decision = ControlDecision {
            action: ControlAction::Block,
            passed: true,
            source: "skill_server".to_owned(),
            policy_version: "1".to_owned(),
            reasons: Vec::new(),
        };
        assert!(!decision.is_actionable("skill_server"));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::AuthorityViolation).unwrap(),
            "\"authority_violation\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::TransientIo).unwrap(),
            "\"transient_io\""
        );
    }

    #[test]
    fn plan_safe_default_matches_contract() {
        let plan = Plan::safe_default();
        assert_eq!(plan.complexity, 1);
        assert!(!plan.needs_memory);
        assert!(!plan.needs_chat_history);
        assert_eq!(plan.hallucination_risk, HallucinationRisk::Med);
    }

    #[test]
    fn request_last_user_text() {
        let req = Request {
            conversation_id: "c1".to_owned(),
            messages: vec![
                Message {
                    role: "system".to_owned(),
                    content: "persona".to_owned(),
                },
                Message {
                    role: "user".to_owned(),
                    content: "hi".to_owned(),
                },
                Message {
                    role: "assistant".to_owned(),
                    content: "hello".to_owned(),
                },
                Message {
                    role: "user".to_owned(),
                    content: "what time is it".to_owned(),
                },
            ],
            model: None,
            stream: false,
            deep_job: false,
            response_mode: None,
        };
        assert_eq!(req.last_user_text(), Some("what time is it"));
    }
}
