//! Output layer: runs the bounded tool loop, applies persona
//! styling, and picks a code-specialized model for code-heavy intents.

use async_trait::async_trait;

use crate::types::{ControlDecision, Plan, ToolCall, ToolCallStatus};

use super::inference::{InferenceError, InferenceProvider};

/// A tool the output layer can dispatch into. Concrete implementations live
/// in the tool hub; this trait is the seam between them.
#[async_trait]
pub trait ToolHub: Send + Sync {
    /// Invoke `tool_name` with `args`, returning its raw text result.
    async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> Result<String, String>;
}

/// One model request emitted by the model mid-generation, asking for a
/// tool call before it continues.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Name of the requested tool.
    pub tool_name: String,
    /// Arguments for the call.
    pub args: serde_json::Value,
}

/// Decides, from the model's latest output, whether to request a tool call
/// or stop with final text.
pub trait ModelTurn: Send + Sync {
    /// Given the accumulated transcript so far, return the next tool
    /// request, or `None` to stop and emit the transcript as final text.
    fn next_turn(&self, transcript: &str, loop_index: u32) -> Option<ToolRequest>;
}

/// Parses tool requests the model emits as a fenced ` ```tool_call ` block
/// holding `{"tool_name": ..., "args": {...}}`. Only blocks appearing after
/// the most recent inserted tool result count, so an already-served request
/// is never replayed on the next loop iteration.
pub struct TranscriptToolTurn;

impl ModelTurn for TranscriptToolTurn {
    fn next_turn(&self, transcript: &str, _loop_index: u32) -> Option<ToolRequest> {
        let tail = match transcript.rfind("[tool:") {
            Some(marker) => {
                let after = &transcript[marker..];
                let close = after.find("]\n")?;
                &after[close.saturating_add(2)..]
            }
            None => transcript,
        };

        let start = tail.find("```tool_call")?;
        let body = &tail[start.saturating_add("```tool_call".len())..];
        let end = body.find("```")?;
        let payload: serde_json::Value = serde_json::from_str(body[..end].trim()).ok()?;

        Some(ToolRequest {
            tool_name: payload.get("tool_name")?.as_str()?.to_owned(),
            args: payload.get("args").cloned().unwrap_or(serde_json::json!({})),
        })
    }
}

/// Errors from the output layer.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// The generation call itself failed.
    #[error("output generation failed: {0}")]
    Inference(#[from] InferenceError),
}

/// Result of running the output layer to completion.
#[derive(Debug, Clone)]
pub struct OutputResult {
    /// Final assistant text.
    pub text: String,
    /// Every tool call made during the loop, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Set when a code-specialized model was used for this turn.
    pub code_model_used: bool,
}

/// Substrings in a plan's intent that route to the code-specialized model.
const CODE_INTENT_MARKERS: &[&str] = &["code", "function", "debug", "refactor", "script"];

fn is_code_heavy(plan: &Plan) -> bool {
    let intent = plan.intent.to_ascii_lowercase();
    CODE_INTENT_MARKERS.iter().any(|m| intent.contains(m))
}

/// Run the output layer: generate, dispatch any requested tool calls back
/// through `tools`, and repeat until the model stops or `max_tool_loops` is
/// hit. Tools are only ever invoked when `decision` is actionable —
/// callers must not reach this function otherwise.
///
/// # Errors
///
/// Returns [`OutputError::Inference`] if the underlying generation call
/// fails; tool invocation failures are recorded as
/// [`ToolCallStatus::Error`] entries and do not abort the loop.
pub async fn run_output(
    provider: &dyn InferenceProvider,
    model: &str,
    code_model: &str,
    plan: &Plan,
    decision: &ControlDecision,
    turn: &dyn ModelTurn,
    tools: &dyn ToolHub,
    max_tool_loops: u32,
) -> Result<OutputResult, OutputError> {
    debug_assert!(
        decision.is_actionable(&decision.source),
        "run_output must only be called with an actionable decision"
    );

    let code_model_used = is_code_heavy(plan);
    let active_model = if code_model_used { code_model } else { model };

    let mut transcript = String::new();
    let mut tool_calls = Vec::new();

    for loop_index in 0..max_tool_loops {
        let response = provider.generate(active_model, &transcript, 1024).await?;
        transcript.push_str(&response);

        match turn.next_turn(&transcript, loop_index) {
            Some(request) => {
                let call = match tools.invoke(&request.tool_name, request.args.clone()).await {
                    Ok(result) => ToolCall {
                        tool_name: request.tool_name,
                        args: request.args,
                        result: Some(result),
                        error: None,
                        status: ToolCallStatus::Success,
                        container_id: None,
                    },
                    Err(err) => ToolCall {
                        tool_name: request.tool_name,
                        args: request.args,
                        result: None,
                        error: Some(err),
                        status: ToolCallStatus::Error,
                        container_id: None,
                    },
                };
                transcript.push_str(&format!("\n[tool:{} -> {:?}]\n", call.tool_name, call.result));
                tool_calls.push(call);
            }
            None => {
                return Ok(OutputResult {
                    text: transcript,
                    tool_calls,
                    code_model_used,
                });
            }
        }
    }

    Ok(OutputResult {
        text: transcript,
        tool_calls,
        code_model_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::inference::ScriptedProvider;
    use crate::types::{ControlAction, HallucinationRisk};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn approved_decision() -> ControlDecision {
        ControlDecision {
            action: ControlAction::Approve,
            passed: true,
            source: "control_layer".to_owned(),
            policy_version: "v1".to_owned(),
            reasons: Vec::new(),
        }
    }

    fn plan(intent: &str) -> Plan {
        Plan {
            intent: intent.to_owned(),
            suggested_tools: Vec::new(),
            needs_memory: false,
            needs_chat_history: false,
            needs_container: false,
            container_name: None,
            complexity: 1,
            hallucination_risk: HallucinationRisk::Low,
            reasoning: String::new(),
        }
    }

    struct StopImmediately;
    impl ModelTurn for StopImmediately {
        fn next_turn(&self, _transcript: &str, _loop_index: u32) -> Option<ToolRequest> {
            None
        }
    }

    struct OneToolThenStop {
        called: AtomicU32,
    }
    impl ModelTurn for OneToolThenStop {
        fn next_turn(&self, _transcript: &str, _loop_index: u32) -> Option<ToolRequest> {
            if self.called.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(ToolRequest {
                    tool_name: "weather.lookup".to_owned(),
                    args: serde_json::json!({}),
                })
            } else {
                None
            }
        }
    }

    struct EchoTool;
    #[async_trait]
    impl ToolHub for EchoTool {
        async fn invoke(&self, tool_name: &str, _args: serde_json::Value) -> Result<String, String> {
            Ok(format!("result for {tool_name}"))
        }
    }

    #[tokio::test]
    async fn no_tool_call_returns_plain_text() {
        let provider = ScriptedProvider::new(vec!["hello".to_owned()]);
        let result = run_output(
            &provider, "m", "code-m", &plan("say hi"), &approved_decision(), &StopImmediately, &EchoTool, 6,
        ).await.unwrap();
        assert!(result.tool_calls.is_empty());
        assert!(!result.code_model_used);
    }

    #[tokio::test]
    async fn tool_loop_records_successful_call_then_stops() {
        let provider = ScriptedProvider::new(vec!["thinking".to_owned(), "done".to_owned()]);
        let turn = OneToolThenStop { called: AtomicU32::new(0) };
        let result = run_output(
            &provider, "m", "code-m", &plan("check weather"), &approved_decision(), &turn, &EchoTool, 6,
        ).await.unwrap();
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].status, ToolCallStatus::Success);
    }

    #[tokio::test]
    async fn code_heavy_intent_uses_code_model() {
        let provider = ScriptedProvider::new(vec!["fixed".to_owned()]);
        let result = run_output(
            &provider, "m", "code-m", &plan("debug this function"), &approved_decision(), &StopImmediately, &EchoTool, 6,
        ).await.unwrap();
        assert!(result.code_model_used);
    }

    #[test]
    fn transcript_turn_parses_fenced_tool_call() {
        let transcript = "let me check\n```tool_call\n{\"tool_name\": \"weather.lookup\", \"args\": {\"city\": \"Berlin\"}}\n```\n";
        let request = TranscriptToolTurn.next_turn(transcript, 0).expect("request");
        assert_eq!(request.tool_name, "weather.lookup");
        assert_eq!(request.args["city"], "Berlin");
    }

    #[test]
    fn transcript_turn_ignores_blocks_before_last_tool_result() {
        let transcript = "```tool_call\n{\"tool_name\": \"a\"}\n```\n[tool:a -> Some(\"ok\")]\nall done";
        assert!(TranscriptToolTurn.next_turn(transcript, 1).is_none());
    }

    #[test]
    fn transcript_turn_none_on_plain_text() {
        assert!(TranscriptToolTurn.next_turn("just an answer", 0).is_none());
    }

    #[tokio::test]
    async fn loop_is_bounded_by_max_tool_loops() {
        struct AlwaysCallTool;
        impl ModelTurn for AlwaysCallTool {
            fn next_turn(&self, _transcript: &str, _loop_index: u32) -> Option<ToolRequest> {
                Some(ToolRequest { tool_name: "noop".to_owned(), args: serde_json::json!({}) })
            }
        }
        let provider = ScriptedProvider::new(vec!["x".to_owned()]);
        let result = run_output(
            &provider, "m", "code-m", &plan("loop forever"), &approved_decision(), &AlwaysCallTool, &EchoTool, 3,
        ).await.unwrap();
        assert_eq!(result.tool_calls.len(), 3);
    }
}
