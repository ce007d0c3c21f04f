//! Skill authority endpoints: create (with package policy and the
//! authority contract), lookup, and the package allowlist.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::config::AuthorityMode;
use crate::memory::WorkspaceEntry;
use crate::skills::executor::enforce_authority_contract;
use crate::skills::{SkillAuthorityError, SkillCreateOutcome, SkillCreateRequest};
use crate::types::ControlDecision;

use super::ServerState;

/// Conversation id approval entries land under when the caller names none.
const DEFAULT_CONVERSATION: &str = "skill_server";

#[derive(Deserialize)]
pub(super) struct CreateSkillBody {
    name: String,
    code: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    requested_packages: Vec<String>,
    #[serde(default)]
    control_decision: Option<ControlDecision>,
    #[serde(default)]
    conversation_id: Option<String>,
}

fn default_language() -> String {
    "python".to_owned()
}

fn pending_package_response(skill_name: &str, missing: &[String]) -> serde_json::Value {
    json!({
        "status": "pending_package_approval",
        // needs_package_install is kept for callers that predate
        // needs_package_approval; both always travel together.
        "needs_package_install": true,
        "needs_package_approval": true,
        "event_type": "approval_requested",
        "missing_packages": missing,
        "skill_name": skill_name,
    })
}

async fn persist_approval_request(
    state: &ServerState,
    conversation_id: &str,
    skill_name: &str,
    missing_packages: &[String],
) {
    let entry = WorkspaceEntry::approval_requested(
        conversation_id,
        "skill_server",
        skill_name,
        missing_packages,
    );
    if let Err(e) = state.memory.save_workspace_entry(entry).await {
        tracing::warn!(error = %e, skill = skill_name, "failed to persist approval request");
    }
}

pub(super) async fn create_skill(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CreateSkillBody>,
) -> Response {
    let conversation_id = body
        .conversation_id
        .clone()
        .unwrap_or_else(|| DEFAULT_CONVERSATION.to_owned());

    // Package policy gates everything else: a request that needs package
    // approval is answered before the authority contract is even checked.
    let missing = state.authority.pending_packages(&body.requested_packages).await;
    if !missing.is_empty() {
        persist_approval_request(&state, &conversation_id, &body.name, &missing).await;
        return Json(pending_package_response(&body.name, &missing)).into_response();
    }

    // With authority=skill_server the executor side of this endpoint only
    // acts on a decision stamped by the authority; callers without one are
    // turned away before any side effect.
    if state.config.skills.authority == AuthorityMode::SkillServer {
        if let Err(SkillAuthorityError::RejectedByAuthority { reason }) =
            enforce_authority_contract(body.control_decision.as_ref())
        {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({"rejected": true, "code": reason})),
            )
                .into_response();
        }
    }

    let skill_name = body.name.clone();
    let request = SkillCreateRequest {
        name: body.name,
        code: body.code,
        language: body.language,
        requested_packages: body.requested_packages,
        control_decision: body.control_decision,
    };

    match state.authority.create(request).await {
        Ok(SkillCreateOutcome::Created(record)) => Json(json!({
            "status": "created",
            "name": record.name,
            "version": record.version,
            "key": record.key,
        }))
        .into_response(),
        Ok(SkillCreateOutcome::PendingPackageApproval {
            skill_name,
            missing_packages,
        }) => {
            persist_approval_request(&state, &conversation_id, &skill_name, &missing_packages).await;
            Json(pending_package_response(&skill_name, &missing_packages)).into_response()
        }
        Ok(SkillCreateOutcome::Blocked { reasons }) => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "rejected": true,
                "code": "rejected_by_authority",
                "status": "blocked",
                "reasons": reasons,
            })),
        )
            .into_response(),
        Ok(SkillCreateOutcome::Escalated { reasons }) => {
            persist_approval_request(&state, &conversation_id, &skill_name, &[]).await;
            Json(json!({
                "status": "pending_approval",
                "event_type": "approval_requested",
                "skill_name": skill_name,
                "reasons": reasons,
            }))
            .into_response()
        }
        Err(SkillAuthorityError::RejectedByAuthority { reason }) => (
            StatusCode::FORBIDDEN,
            Json(json!({"rejected": true, "code": reason})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct SkillQuery {
    #[serde(default)]
    #[allow(dead_code)]
    channel: Option<String>,
}

pub(super) async fn get_skill(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Query(_query): Query<SkillQuery>,
) -> Response {
    let record = state
        .authority
        .registry()
        .active_records()
        .into_iter()
        .find(|r| r.name == name);

    match record {
        Some(record) => Json(json!({
            "name": record.name,
            "version": record.version,
            "status": record.status,
            "key": record.key,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown skill"})),
        )
            .into_response(),
    }
}

pub(super) async fn list_packages(State(state): State<Arc<ServerState>>) -> Response {
    match state.allowlist.list().await {
        Ok(packages) => Json(json!({"packages": packages})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
pub(super) struct AddPackageBody {
    name: String,
}

pub(super) async fn add_package(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<AddPackageBody>,
) -> Response {
    match state.allowlist.add(&body.name).await {
        Ok(()) => Json(json!({"added": true, "name": body.name})).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
