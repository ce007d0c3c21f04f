//! Thinking layer: produces a [`Plan`] from the user query and
//! context. No side effects, no tool calls. On unparsable output, retries
//! once, then falls back to [`Plan::safe_default`].

use crate::types::Plan;

use super::inference::{InferenceError, InferenceProvider};

/// Errors from the planning stage. Every variant is recoverable —
/// `plan()` never propagates a parse failure, only an inference failure
/// that survived the retry.
#[derive(Debug, thiserror::Error)]
pub enum ThinkingError {
    /// Both the initial call and its retry failed at the transport level.
    #[error("planner inference failed after retry: {0}")]
    Inference(#[from] InferenceError),
}

fn parse_plan(raw: &str) -> Option<Plan> {
    serde_json::from_str(raw).ok()
}

/// Build the fixed planning prompt for `context_prompt` + `query`.
fn planning_prompt(context_prompt: &str, query: &str) -> String {
    format!(
        "{context_prompt}\n\nUser query: {query}\n\nRespond with JSON only: \
         {{\"intent\":...,\"suggested_tools\":[...],\"needs_memory\":bool,\
         \"needs_chat_history\":bool,\"needs_container\":bool,\"container_name\":string|null,\
         \"complexity\":1-10,\"hallucination_risk\":\"low\"|\"med\"|\"high\",\"reasoning\":...}}"
    )
}

/// Produce a [`Plan`] for `query` given the assembled context prompt.
///
/// # Errors
///
/// Returns [`ThinkingError::Inference`] only if both the first call and the
/// one retry fail to return a response at all; a response that parses as
/// invalid JSON does not error, it retries then falls back.
pub async fn plan(
    provider: &dyn InferenceProvider,
    model: &str,
    context_prompt: &str,
    query: &str,
) -> Result<Plan, ThinkingError> {
    let prompt = planning_prompt(context_prompt, query);

    let first = provider.generate(model, &prompt, 512).await?;
    if let Some(plan) = parse_plan(&first) {
        return Ok(plan);
    }

    let retry = provider.generate(model, &prompt, 512).await?;
    if let Some(plan) = parse_plan(&retry) {
        return Ok(plan);
    }

    Ok(Plan::safe_default())
}
