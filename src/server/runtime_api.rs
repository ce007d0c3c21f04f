//! Digest runtime-state endpoint. Read-only: the digest worker owns the
//! state file and the lock; this handler only reports them.
//!
//! Two wire shapes are served. The v2 shape flattens per-cycle status,
//! catch-up, JIT, and locking into one object; the legacy v1 shape
//! (`{state, flags, lock}`) is kept for callers that set
//! `DIGEST_RUNTIME_API_V2=false`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::digest::lock::{lock_state, LockInfo};
use crate::digest::{CycleState, DigestState};

use super::ServerState;

fn cycle_json(cycle: Option<&CycleState>) -> serde_json::Value {
    match cycle {
        Some(state) => json!({
            "status": state.status,
            "reason": state.reason,
            "ts": state.ts,
        }),
        None => json!({"status": "never_ran"}),
    }
}

fn locking_json(lock: Option<&LockInfo>, default_timeout_s: u64) -> serde_json::Value {
    match lock {
        Some(info) => json!({
            "status": "LOCKED",
            "owner": info.owner,
            "since": info.acquired_at,
            "timeout_s": info.timeout_s,
            "stale": info.is_stale(chrono::Utc::now()),
        }),
        None => json!({
            "status": "FREE",
            "timeout_s": default_timeout_s,
            "stale": false,
        }),
    }
}

fn flags_json(state: &ServerState) -> serde_json::Value {
    json!({
        "digest_enable": state.config.digest.enable,
        "daily_enable": state.config.digest.daily_enable,
        "weekly_enable": state.config.digest.weekly_enable,
        "archive_enable": state.config.digest.archive_enable,
        "run_mode": state.config.digest.run_mode.to_string(),
        "key_version": state.config.digest.key_version.to_string(),
        "dedupe_include_conv": state.config.digest.dedupe_include_conv,
    })
}

pub(super) async fn digest_state_handler(State(state): State<Arc<ServerState>>) -> Response {
    let digest_state = match DigestState::load(&state.config.paths.digest_state_path()) {
        Ok(s) => s,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    };
    let lock = lock_state(&state.config.paths.digest_lock_path());

    if !state.config.digest.runtime_api_v2 {
        return Json(json!({
            "state": digest_state,
            "flags": flags_json(&state),
            "lock": locking_json(lock.as_ref(), state.config.digest.lock_timeout_s),
        }))
        .into_response();
    }

    Json(json!({
        "jit_only": state.config.context.jit_only,
        "daily_digest": cycle_json(digest_state.cycles.daily.as_ref()),
        "weekly_digest": cycle_json(digest_state.cycles.weekly.as_ref()),
        "archive_digest": cycle_json(digest_state.cycles.archive.as_ref()),
        "catch_up": digest_state.catch_up,
        "jit": digest_state.jit,
        "locking": locking_json(lock.as_ref(), state.config.digest.lock_timeout_s),
        "flags": flags_json(&state),
    }))
    .into_response()
}
