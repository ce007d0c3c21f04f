//! Integration tests for the runtime API server: package policy and
//! authority contract on the skill endpoints, the digest runtime-state
//! shapes, workspace read/edit rules, and chat envelope parity.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use assistantd::config::AssistantConfig;
use assistantd::context::engine_source::EngineContextSource;
use assistantd::digest::source::FileDigestSource;
use assistantd::memory::{MemoryEngine, WorkspaceEntry};
use assistantd::pipeline::inference::ScriptedProvider;
use assistantd::pipeline::JobStore;
use assistantd::server::{build_router, ServerState};
use assistantd::skills::allowlist::PackageAllowlist;
use assistantd::skills::executor::DirectSkillExecutor;
use assistantd::skills::registry::SkillRegistry;
use assistantd::skills::SkillAuthority;
use assistantd::tools::registry::ToolRegistry;
use assistantd::tools::HttpToolHub;

struct TestServer {
    base_url: String,
    state: Arc<ServerState>,
    _dir: tempfile::TempDir,
}

fn plan_json() -> String {
    serde_json::json!({
        "intent": "greet",
        "suggested_tools": [],
        "needs_memory": false,
        "needs_chat_history": false,
        "needs_container": false,
        "container_name": null,
        "complexity": 1,
        "hallucination_risk": "low",
        "reasoning": "",
    })
    .to_string()
}

async fn spawn_server(scripted: Vec<String>) -> TestServer {
    spawn_server_with(scripted, |_| {}).await
}

async fn spawn_server_with(
    scripted: Vec<String>,
    configure: impl FnOnce(&mut AssistantConfig),
) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let state_dir = dir.path().to_path_buf();

    let mut config = AssistantConfig::default();
    config.paths.state_dir = state_dir.display().to_string();
    configure(&mut config);

    std::fs::write(
        config.paths.allowlist_path(),
        serde_json::json!(["pandas", "numpy"]).to_string(),
    )
    .expect("seed allowlist");

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    let memory = Arc::new(MemoryEngine::new(pool, None).await.expect("memory engine"));

    let tools_dir = config.paths.tools_dir();
    std::fs::create_dir_all(&tools_dir).expect("tools dir");
    let tool_registry = ToolRegistry::new_without_watcher(tools_dir).expect("tool registry");
    let tool_hub = Arc::new(HttpToolHub::new(
        Arc::clone(&tool_registry),
        Default::default(),
        assistantd::credentials::Credentials::from_map(BTreeMap::new()),
    ));

    let skill_registry =
        Arc::new(SkillRegistry::load(config.paths.skill_registry_path()).expect("skill registry"));
    let allowlist = Arc::new(PackageAllowlist::open(
        config.paths.allowlist_path(),
        config.skills.allowlist_cache_ttl_secs,
    ));
    let authority = Arc::new(SkillAuthority::new(
        config.skills.authority,
        config.skills.package_install_mode,
        Box::new(Arc::clone(&allowlist)),
        Box::new(DirectSkillExecutor::new(config.skills.authority)),
        Arc::clone(&skill_registry),
        None,
    ));

    let provider = Arc::new(ScriptedProvider::new(scripted));
    let digest_source = Arc::new(FileDigestSource::open(&state_dir).expect("digest source"));
    let context_source = Arc::new(EngineContextSource::new(
        Arc::clone(&memory),
        skill_registry,
        tool_registry,
        digest_source,
        provider.clone(),
        "test-model",
        config.paths.persona_path(),
    ));

    let state = Arc::new(ServerState {
        config,
        memory,
        context_source,
        provider,
        tools: tool_hub,
        authority,
        allowlist,
        jobs: Arc::new(JobStore::default()),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    let router = build_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    TestServer {
        base_url: format!("http://{addr}"),
        state,
        _dir: dir,
    }
}

fn approve_decision() -> serde_json::Value {
    serde_json::json!({
        "action": "approve",
        "passed": true,
        "source": "skill_server",
        "policy_version": "control-v1",
        "reasons": [],
    })
}

#[tokio::test]
async fn non_allowlisted_package_yields_pending_approval_and_no_registry_write() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/v1/skills/create", server.base_url))
        .json(&serde_json::json!({
            "name": "demo",
            "code": "import pandas",
            "requested_packages": ["pandas", "acme-widget"],
        }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    assert_eq!(body["status"], "pending_package_approval");
    assert_eq!(body["needs_package_install"], true);
    assert_eq!(body["needs_package_approval"], true);
    assert_eq!(body["event_type"], "approval_requested");
    assert_eq!(body["missing_packages"], serde_json::json!(["acme-widget"]));
    assert_eq!(body["skill_name"], "demo");

    assert!(server.state.authority.registry().active_records().is_empty());
}

#[tokio::test]
async fn pending_approval_is_persisted_as_workspace_event() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/v1/skills/create", server.base_url))
        .json(&serde_json::json!({
            "name": "demo",
            "code": "import pandas",
            "requested_packages": ["acme-widget"],
            "conversation_id": "c9",
        }))
        .send()
        .await
        .expect("request");

    // The workspace write goes through the single-writer actor; give it a
    // moment to drain.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rows: serde_json::Value = client
        .get(format!(
            "{}/api/workspace-events?conversation_id=c9",
            server.base_url
        ))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["entry_type"], "approval_requested");
    assert_eq!(rows[0]["_source"], "event");
    let content: serde_json::Value =
        serde_json::from_str(rows[0]["content"].as_str().expect("content string")).expect("json");
    assert_eq!(content["skill_name"], "demo");
    assert_eq!(content["missing_packages"], serde_json::json!(["acme-widget"]));
}

#[tokio::test]
async fn create_without_control_decision_is_rejected_by_executor_contract() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/skills/create", server.base_url))
        .json(&serde_json::json!({
            "name": "demo",
            "code": "print('hi')",
            "requested_packages": ["pandas"],
        }))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["rejected"], true);
    assert_eq!(body["code"], "missing_authority_decision");
}

#[tokio::test]
async fn create_with_actionable_decision_persists_and_is_readable() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/v1/skills/create", server.base_url))
        .json(&serde_json::json!({
            "name": "greeter",
            "code": "print('hello')",
            "control_decision": approve_decision(),
        }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    assert_eq!(body["status"], "created");
    assert_eq!(body["name"], "greeter");

    let fetched: serde_json::Value = client
        .get(format!("{}/v1/skills/greeter", server.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");
    assert_eq!(fetched["name"], "greeter");
    assert_eq!(fetched["status"], "active");

    let missing = client
        .get(format!("{}/v1/skills/nonexistent", server.base_url))
        .send()
        .await
        .expect("request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creating_twice_with_same_key_keeps_one_record() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        client
            .post(format!("{}/v1/skills/create", server.base_url))
            .json(&serde_json::json!({
                "name": "greeter",
                "code": "print('hello')",
                "control_decision": approve_decision(),
            }))
            .send()
            .await
            .expect("request");
    }

    let records = server.state.authority.registry().active_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].version, 2);
}

#[tokio::test]
async fn package_endpoints_list_and_extend_the_allowlist() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/v1/packages", server.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");
    assert_eq!(body["packages"], serde_json::json!(["numpy", "pandas"]));

    client
        .post(format!("{}/v1/packages", server.base_url))
        .json(&serde_json::json!({"name": "requests"}))
        .send()
        .await
        .expect("request");

    let body: serde_json::Value = client
        .get(format!("{}/v1/packages", server.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");
    assert_eq!(
        body["packages"],
        serde_json::json!(["numpy", "pandas", "requests"])
    );
}

#[tokio::test]
async fn digest_state_v2_shape_reports_free_lock_and_never_ran_cycles() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/api/runtime/digest-state", server.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    assert_eq!(body["jit_only"], true);
    assert_eq!(body["daily_digest"]["status"], "never_ran");
    assert_eq!(body["weekly_digest"]["status"], "never_ran");
    assert_eq!(body["archive_digest"]["status"], "never_ran");
    assert_eq!(body["locking"]["status"], "FREE");
    assert_eq!(body["locking"]["stale"], false);
    assert_eq!(body["locking"]["timeout_s"], 300);
    assert_eq!(body["catch_up"]["missed_runs"], 0);
    assert_eq!(body["flags"]["key_version"], "v2");
}

#[tokio::test]
async fn digest_state_v1_legacy_shape_is_state_flags_lock() {
    let server = spawn_server_with(vec![plan_json()], |config| {
        config.digest.runtime_api_v2 = false;
    })
    .await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .get(format!("{}/api/runtime/digest-state", server.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");

    assert!(body.get("state").is_some());
    assert!(body.get("flags").is_some());
    assert!(body.get("lock").is_some());
    assert_eq!(body["state"]["schema_version"], 2);
    assert!(body.get("daily_digest").is_none());
}

#[tokio::test]
async fn workspace_rows_expose_source_and_enforce_edit_rules() {
    let server = spawn_server(vec![plan_json()]).await;
    let client = reqwest::Client::new();

    server
        .state
        .memory
        .save_workspace_entry(WorkspaceEntry::entry("c1", "user_message", "orchestrator", "hi"))
        .await
        .expect("save entry");
    server
        .state
        .memory
        .save_workspace_entry(WorkspaceEntry::event(
            "c1",
            "tool_result",
            "output_layer",
            "42",
            serde_json::json!({"tool_name": "calc"}),
        ))
        .await
        .expect("save event");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let rows: serde_json::Value = client
        .get(format!("{}/api/workspace?conversation_id=c1", server.base_url))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["_source"], "entry");
    assert_eq!(rows[1]["_source"], "event");

    let entry_id = rows[0]["id"].as_i64().expect("entry id");
    let event_id = rows[1]["id"].as_i64().expect("event id");

    // Editable row updates.
    let response = client
        .put(format!("{}/api/workspace/{entry_id}", server.base_url))
        .json(&serde_json::json!({"content": "hi (edited)"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Event projections are read-only.
    let response = client
        .put(format!("{}/api/workspace/{event_id}", server.base_url))
        .json(&serde_json::json!({"content": "tampered"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    // Delete works and a second delete 404s.
    let response = client
        .delete(format!("{}/api/workspace/{entry_id}", server.base_url))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = client
        .delete(format!("{}/api/workspace/{entry_id}", server.base_url))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_sync_and_stream_produce_the_same_assistant_text() {
    let script = vec![
        plan_json(),
        "hello there".to_owned(),
        plan_json(),
        "hello there".to_owned(),
    ];
    let server = spawn_server(script).await;
    let client = reqwest::Client::new();

    let request_body = serde_json::json!({
        "conversation_id": "c1",
        "messages": [{"role": "user", "content": "hi"}],
    });

    let sync_body: serde_json::Value = client
        .post(format!("{}/api/chat", server.base_url))
        .json(&request_body)
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");
    assert_eq!(sync_body["done"], true);
    assert_eq!(sync_body["message"]["content"], "hello there");

    let mut stream_request = request_body.clone();
    stream_request["stream"] = serde_json::json!(true);
    let text = client
        .post(format!("{}/api/chat", server.base_url))
        .json(&stream_request)
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body text");

    let chunks: Vec<serde_json::Value> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("chunk json"))
        .collect();

    let content = chunks
        .iter()
        .find(|c| c["type"] == "content")
        .expect("content chunk");
    assert_eq!(content["content"], "hello there");
    assert_eq!(chunks.last().expect("done chunk")["type"], "done");
}

#[tokio::test]
async fn deep_job_runs_to_completion_and_is_pollable() {
    let server = spawn_server(vec![plan_json(), "job done".to_owned()]).await;
    let client = reqwest::Client::new();

    let submitted: serde_json::Value = client
        .post(format!("{}/api/chat/deep-jobs", server.base_url))
        .json(&serde_json::json!({
            "conversation_id": "c1",
            "messages": [{"role": "user", "content": "long task"}],
            "deep_job": true,
        }))
        .send()
        .await
        .expect("request")
        .json()
        .await
        .expect("json body");
    let job_id = submitted["job_id"].as_str().expect("job id").to_owned();

    let mut last = serde_json::Value::Null;
    for _ in 0..50 {
        last = client
            .get(format!("{}/api/chat/deep-jobs/{job_id}", server.base_url))
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("json body");
        if last["status"] == "succeeded" || last["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(last["status"], "succeeded");
    assert_eq!(last["result"], "job done");

    let response = client
        .get(format!("{}/api/chat/deep-jobs/unknown-id", server.base_url))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
