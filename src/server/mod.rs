//! Runtime API server: the HTTP surface over the orchestrator, the
//! workspace, the skill authority, and the digest runtime state.
//!
//! Route handlers live in one file per concern; shared state is one
//! [`ServerState`] behind an `Arc`. Everything here is a thin adapter —
//! request parsing and response shaping only, with the behavior owned by
//! the components the state carries.

mod chat_api;
mod runtime_api;
mod skills_api;
mod workspace_api;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tracing::info;

use crate::config::AssistantConfig;
use crate::context::ContextDataSource;
use crate::memory::MemoryEngine;
use crate::pipeline::inference::InferenceProvider;
use crate::pipeline::output::ToolHub;
use crate::pipeline::JobStore;
use crate::skills::allowlist::PackageAllowlist;
use crate::skills::SkillAuthority;

use chat_api::{chat_handler, deep_job_status, submit_deep_job};
use runtime_api::digest_state_handler;
use skills_api::{add_package, create_skill, get_skill, list_packages};
use workspace_api::{
    delete_workspace_entry, list_workspace, list_workspace_events, update_workspace_entry,
};

/// Everything the route handlers need, shared behind one `Arc`.
pub struct ServerState {
    /// Resolved runtime configuration.
    pub config: AssistantConfig,
    /// Workspace and fact store.
    pub memory: Arc<MemoryEngine>,
    /// Context-builder data source for orchestrator turns.
    pub context_source: Arc<dyn ContextDataSource>,
    /// Inference endpoint shared by every pipeline stage.
    pub provider: Arc<dyn InferenceProvider>,
    /// Tool hub the output layer dispatches into.
    pub tools: Arc<dyn ToolHub>,
    /// The single control authority for skill creation.
    pub authority: Arc<SkillAuthority>,
    /// Package allowlist behind the /v1/packages endpoints.
    pub allowlist: Arc<PackageAllowlist>,
    /// Deep-job registry.
    pub jobs: Arc<JobStore>,
}

/// Assemble the full route table over `state`.
pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/deep-jobs", post(submit_deep_job))
        .route("/api/chat/deep-jobs/{id}", get(deep_job_status))
        .route("/api/workspace", get(list_workspace))
        .route(
            "/api/workspace/{id}",
            put(update_workspace_entry).delete(delete_workspace_entry),
        )
        .route("/api/workspace-events", get(list_workspace_events))
        .route("/api/runtime/digest-state", get(digest_state_handler))
        .route("/v1/skills/create", post(create_skill))
        .route("/v1/skills/{name}", get(get_skill))
        .route("/v1/packages", get(list_packages).post(add_package))
        .with_state(state)
}

/// Serve the runtime API on `listener` until the shutdown signal flips.
///
/// # Errors
///
/// Returns an error if the underlying accept loop fails.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "runtime API listening");
    }
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
}
