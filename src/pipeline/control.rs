//! Control layer: turns a [`Plan`] into a [`ControlDecision`],
//! short-circuiting deep reasoning for low-risk plans and running the
//! skill-related state machine (`pattern_check` always precedes
//! `authority_decision`) for plans that mutate skills.

use regex::Regex;

use crate::skills::validator;
use crate::types::{ControlAction, ControlDecision, HallucinationRisk, Plan};

use super::inference::{InferenceError, InferenceProvider};

/// Source tag this layer stamps on decisions it produces directly (as
/// opposed to ones it relays from the skill authority).
pub const CONTROL_LAYER_SOURCE: &str = "control_layer";

/// A skill-mutating request detected in the plan, carrying what the safety
/// pattern checker needs.
#[derive(Debug, Clone)]
pub struct SkillIntent {
    /// Source code of the skill being created or modified.
    pub code: String,
    /// Language tag.
    pub language: String,
}

/// Position in the skill-related control state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Nothing evaluated yet.
    Initial,
    /// The fast pattern pre-filter has run.
    PatternChecked,
    /// A pending-approval record was persisted (escalate path only).
    PendingApproval,
    /// Terminal: the control layer has produced its final decision.
    Terminal,
}

/// Result of one control-layer evaluation.
#[derive(Debug, Clone)]
pub struct ControlOutcome {
    /// Final decision.
    pub decision: ControlDecision,
    /// Structured reasoning steps, present only for plans complex enough to
    /// skip the short-circuit.
    pub reasoning_steps: Vec<String>,
    /// Whether deep reasoning was skipped (low risk, no skill intent).
    pub skipped_deep_reasoning: bool,
    /// Final state machine position.
    pub state: ControlState,
}

/// Errors from the control layer.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The deep-reasoning inference call failed.
    #[error("control reasoning inference failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Parses `## Step N: ...` reasoning lines, the fixed regex contract for
/// sequential reasoning steps.
fn parse_reasoning_steps(text: &str) -> Vec<String> {
    let re = Regex::new(r"(?m)^##\s*Step\s+(\d+):\s*(.*)$").expect("static regex");
    re.captures_iter(text).map(|c| c[2].trim().to_owned()).collect()
}

fn short_circuit_eligible(plan: &Plan, skill_intent: Option<&SkillIntent>) -> bool {
    plan.hallucination_risk == HallucinationRisk::Low && skill_intent.is_none()
}

/// Evaluate `plan`, running the skill-mutation state machine when
/// `skill_intent` is present and skipping deep reasoning otherwise when the
/// plan is low-risk.
///
/// # Errors
///
/// Returns an error only if the deep-reasoning inference call fails; the
/// safety pattern check itself never calls out to inference.
pub async fn run_control(
    plan: &Plan,
    provider: &dyn InferenceProvider,
    model: &str,
    skill_intent: Option<&SkillIntent>,
) -> Result<ControlOutcome, ControlError> {
    if short_circuit_eligible(plan, skill_intent) {
        return Ok(ControlOutcome {
            decision: ControlDecision {
                action: ControlAction::Approve,
                passed: true,
                source: CONTROL_LAYER_SOURCE.to_owned(),
                policy_version: "control-v1".to_owned(),
                reasons: Vec::new(),
            },
            reasoning_steps: Vec::new(),
            skipped_deep_reasoning: true,
            state: ControlState::Terminal,
        });
    }

    let mut state = ControlState::Initial;

    // Ordering invariant: pattern_check always precedes authority_decision.
    let pattern_decision = skill_intent.map(|intent| validator::validate(&intent.code, &intent.language));
    state = ControlState::PatternChecked;

    if let Some(decision) = &pattern_decision {
        if decision.action == ControlAction::Block {
            return Ok(ControlOutcome {
                decision: decision.clone(),
                reasoning_steps: Vec::new(),
                skipped_deep_reasoning: false,
                state: ControlState::Terminal,
            });
        }
        if decision.action == ControlAction::Escalate {
            state = ControlState::PendingApproval;
        }
    }

    let reasoning_steps = if plan.complexity >= 5 {
        let prompt = format!(
            "Reason step by step about this plan before deciding. Intent: {}\nEmit each step as '## Step N: <text>'.",
            plan.intent
        );
        let response = provider.generate(model, &prompt, 1024).await?;
        parse_reasoning_steps(&response)
    } else {
        Vec::new()
    };

    let decision = pattern_decision.unwrap_or(ControlDecision {
        action: ControlAction::Approve,
        passed: true,
        source: CONTROL_LAYER_SOURCE.to_owned(),
        policy_version: "control-v1".to_owned(),
        reasons: Vec::new(),
    });

    Ok(ControlOutcome {
        decision,
        reasoning_steps,
        skipped_deep_reasoning: false,
        state: if state == ControlState::PendingApproval {
            ControlState::PendingApproval
        } else {
            ControlState::Terminal
        },
    })
}
