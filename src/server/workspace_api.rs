//! Workspace endpoints: the UI's read/edit surface over the orchestrator's
//! workspace log. Editable rows carry `_source="entry"`; event projections
//! are read-only and only reachable through `/api/workspace-events`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::memory::{EntrySource, WorkspaceEntry};

use super::ServerState;

const DEFAULT_LIMIT: usize = 100;

#[derive(Deserialize)]
pub(super) struct WorkspaceQuery {
    conversation_id: String,
    limit: Option<usize>,
}

/// Wire shape for one workspace row.
#[derive(Serialize)]
struct WorkspaceRow {
    id: Option<i64>,
    conversation_id: String,
    entry_type: String,
    source_layer: String,
    content: String,
    event_data: Option<serde_json::Value>,
    #[serde(rename = "_source")]
    source: &'static str,
    created_at: Option<String>,
}

impl From<WorkspaceEntry> for WorkspaceRow {
    fn from(entry: WorkspaceEntry) -> Self {
        Self {
            id: entry.id,
            conversation_id: entry.conversation_id,
            entry_type: entry.entry_type,
            source_layer: entry.source_layer,
            content: entry.content,
            event_data: entry.event_data,
            source: entry.source.as_str(),
            created_at: entry.created_at,
        }
    }
}

pub(super) async fn list_workspace(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<WorkspaceQuery>,
) -> Response {
    match state
        .memory
        .list_workspace_entries(&query.conversation_id, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await
    {
        Ok(entries) => {
            let rows: Vec<WorkspaceRow> = entries.into_iter().map(WorkspaceRow::from).collect();
            Json(rows).into_response()
        }
        Err(e) => storage_error(&e),
    }
}

pub(super) async fn list_workspace_events(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<WorkspaceQuery>,
) -> Response {
    match state
        .memory
        .list_workspace_entries(&query.conversation_id, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await
    {
        Ok(entries) => {
            let rows: Vec<WorkspaceRow> = entries
                .into_iter()
                .filter(|e| e.source == EntrySource::Event)
                .map(WorkspaceRow::from)
                .collect();
            Json(rows).into_response()
        }
        Err(e) => storage_error(&e),
    }
}

#[derive(Deserialize)]
pub(super) struct UpdateBody {
    content: String,
}

pub(super) async fn update_workspace_entry(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateBody>,
) -> Response {
    let existing = match state.memory.get_workspace_entry(id).await {
        Ok(entry) => entry,
        Err(e) => return storage_error(&e),
    };

    let Some(entry) = existing else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown entry"}))).into_response();
    };
    if !entry.source.is_editable() {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "read_only", "_source": entry.source.as_str()})),
        )
            .into_response();
    }

    match state.memory.update_workspace_entry(id, body.content).await {
        Ok(()) => Json(json!({"updated": true, "id": id})).into_response(),
        Err(e) => storage_error(&e),
    }
}

pub(super) async fn delete_workspace_entry(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<i64>,
) -> Response {
    match state.memory.get_workspace_entry(id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown entry"}))).into_response()
        }
        Err(e) => return storage_error(&e),
    }

    match state.memory.delete_workspace_entry(id).await {
        Ok(()) => Json(json!({"deleted": true, "id": id})).into_response(),
        Err(e) => storage_error(&e),
    }
}

fn storage_error(e: &crate::memory::MemoryError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}
