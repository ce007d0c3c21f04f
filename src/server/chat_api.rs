//! Chat endpoint and deep-job endpoints.
//!
//! `POST /api/chat` runs one orchestrator turn: either a single JSON
//! envelope, or newline-delimited JSON chunks when `stream=true`. Deep
//! jobs run the same turn in a background task, polled by id.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::pipeline::output::TranscriptToolTurn;
use crate::pipeline::{FinalResponse, JobStatus, Orchestrator, PipelineError, PipelineEvent};
use crate::types::Request;

use super::ServerState;

/// Run one orchestrator turn against the state's collaborators.
async fn run_turn(state: &ServerState, request: &Request) -> Result<FinalResponse, PipelineError> {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.pipeline.model.clone());

    let orchestrator = Orchestrator::new(
        &*state.context_source,
        &*state.provider,
        &*state.tools,
        &state.memory,
        model,
        state.config.pipeline.code_model.clone(),
        state.config.pipeline.max_tool_loops,
    );
    orchestrator.process(request, &TranscriptToolTurn).await
}

async fn run_turn_events(
    state: &ServerState,
    request: &Request,
) -> Result<Vec<PipelineEvent>, PipelineError> {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.pipeline.model.clone());

    let orchestrator = Orchestrator::new(
        &*state.context_source,
        &*state.provider,
        &*state.tools,
        &state.memory,
        model,
        state.config.pipeline.code_model.clone(),
        state.config.pipeline.max_tool_loops,
    );
    orchestrator.process_stream(request, &TranscriptToolTurn).await
}

/// One stream chunk in the wire format: `{"type": ..., ...payload}`.
fn event_chunk(event: &PipelineEvent) -> serde_json::Value {
    match event {
        PipelineEvent::ThinkingStream(text) => json!({"type": "thinking_stream", "content": text}),
        PipelineEvent::ThinkingDone => json!({"type": "thinking_done"}),
        PipelineEvent::SeqThinkingStream(text) => {
            json!({"type": "seq_thinking_stream", "content": text})
        }
        PipelineEvent::SeqThinkingDone => json!({"type": "seq_thinking_done"}),
        PipelineEvent::SequentialStart => json!({"type": "sequential_start"}),
        PipelineEvent::SequentialStep(step) => json!({"type": "sequential_step", "content": step}),
        PipelineEvent::SequentialDone => json!({"type": "sequential_done"}),
        PipelineEvent::Control(decision) => json!({"type": "control", "decision": decision}),
        PipelineEvent::ContainerStart(name) => json!({"type": "container_start", "name": name}),
        PipelineEvent::ContainerDone(name) => json!({"type": "container_done", "name": name}),
        PipelineEvent::PanelCreateTab(title) => json!({"type": "panel_create_tab", "title": title}),
        PipelineEvent::PanelUpdate(content) => json!({"type": "panel_update", "content": content}),
        PipelineEvent::Content(text) => json!({"type": "content", "content": text}),
        PipelineEvent::Memory(note) => json!({"type": "memory", "content": note}),
        PipelineEvent::Done => json!({"type": "done", "done": true}),
        PipelineEvent::Error(reason) => json!({"type": "error", "error": reason}),
    }
}

fn ndjson_response(chunks: Vec<serde_json::Value>) -> Response {
    let lines = chunks
        .into_iter()
        .map(|chunk| Ok::<String, Infallible>(format!("{chunk}\n")));
    let body = Body::from_stream(tokio_stream::iter(lines));
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response()
}

pub(super) async fn chat_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<Request>,
) -> Response {
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| state.config.pipeline.model.clone());

    if request.stream {
        let chunks = match run_turn_events(&state, &request).await {
            Ok(events) => events.iter().map(event_chunk).collect(),
            Err(e) => vec![event_chunk(&PipelineEvent::Error(e.to_string()))],
        };
        return ndjson_response(chunks);
    }

    let content = match run_turn(&state, &request).await {
        Ok(response) => response.text,
        Err(e) => {
            tracing::warn!(
                conversation_id = %request.conversation_id,
                kind = ?e.propagation_policy(),
                error = %e,
                "chat turn failed"
            );
            format!("❌ Fehler: {e}")
        }
    };

    Json(json!({
        "message": {"content": content},
        "model": model,
        "done": true,
    }))
    .into_response()
}

pub(super) async fn submit_deep_job(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<Request>,
) -> Response {
    let job_id = uuid::Uuid::new_v4().to_string();
    state.jobs.submit(job_id.clone());

    let task_state = Arc::clone(&state);
    let task_job_id = job_id.clone();
    tokio::spawn(async move {
        task_state.jobs.mark_running(&task_job_id);
        let outcome = run_turn(&task_state, &request)
            .await
            .map(|r| r.text)
            .map_err(|e| e.to_string());
        task_state.jobs.complete(&task_job_id, outcome);
    });

    Json(json!({"job_id": job_id})).into_response()
}

pub(super) async fn deep_job_status(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(job) = state.jobs.status(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown job"}))).into_response();
    };

    let status = match job.status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Succeeded => "succeeded",
        JobStatus::Failed => "failed",
    };

    Json(json!({
        "status": status,
        "duration_ms": job.duration_ms,
        "result": job.result,
    }))
    .into_response()
}
