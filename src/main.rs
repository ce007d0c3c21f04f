//! CLI entry point: boots the daemon or runs a one-shot administrative
//! subcommand against the same configuration the daemon loads.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use assistantd::config::{AssistantConfig, DigestRunMode};
use assistantd::context::engine_source::EngineContextSource;
use assistantd::digest::scheduler::{catch_up_missed_days, should_trigger};
use assistantd::digest::source::FileDigestSource;
use assistantd::digest::{
    lock::DigestLock, run_archive_cycle, run_daily_cycle, run_weekly_cycle, CatchUpState, DigestSource, DigestState,
};
use assistantd::graph::reconcile_orphans;
use assistantd::memory::MemoryEngine;
use assistantd::pipeline::inference::HttpInferenceProvider;
use assistantd::pipeline::JobStore;
use assistantd::server::{self, ServerState};
use assistantd::skills::allowlist::PackageAllowlist;
use assistantd::skills::executor::DirectSkillExecutor;
use assistantd::skills::registry::SkillRegistry;
use assistantd::skills::{validator, SkillAuthority};
use assistantd::tools::registry::ToolRegistry;
use assistantd::tools::HttpToolHub;

use clap::{Parser, Subcommand};

/// Exit codes: 0 normal, 1 fatal configuration error, 2 external
/// dependency unreachable at startup, 3 refused by safety.
const EXIT_CONFIG: u8 = 1;
const EXIT_DEPENDENCY: u8 = 2;
const EXIT_SAFETY: u8 = 3;

#[derive(Parser)]
#[command(name = "assistantd", about = "Local-first assistant runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the orchestrator, digest worker, and runtime API server.
    Start,
    /// Digest pipeline administration.
    Digest {
        #[command(subcommand)]
        action: DigestAction,
    },
    /// Skill authority administration.
    Skills {
        #[command(subcommand)]
        action: SkillsAction,
    },
    /// Graph hygiene administration.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },
    /// Configuration administration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DigestAction {
    /// Run digest cycles once, outside the scheduler.
    Run {
        #[arg(long, default_value = "all")]
        cycle: String,
    },
}

#[derive(Subcommand)]
enum SkillsAction {
    /// Dry-run the control authority's validator against a skill source file.
    Validate {
        file: PathBuf,
        #[arg(long, default_value = "python")]
        language: String,
    },
}

#[derive(Subcommand)]
enum GraphAction {
    /// Run the standalone Graph Hygiene reconcile-orphans pass once.
    Reconcile,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate configuration, printing the resolved config.
    Check,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Start) {
        return run_start().await;
    }

    assistantd::logging::init_cli();
    let result = match &cli.command {
        Command::Start => Ok(()),
        Command::Digest { action } => run_digest_action(action).await,
        Command::Skills { action } => run_skills_action(action),
        Command::Graph { action } => run_graph_action(action),
        Command::Config { action } => run_config_action(action),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let code = if e.downcast_ref::<SafetyRefusal>().is_some() {
                EXIT_SAFETY
            } else {
                EXIT_CONFIG
            };
            std::process::ExitCode::from(code)
        }
    }
}

/// Marker error: a one-shot subcommand was refused by the safety
/// validator, mapped to its own exit code.
#[derive(Debug, thiserror::Error)]
#[error("refused by safety validator")]
struct SafetyRefusal;

async fn run_digest_action(action: &DigestAction) -> anyhow::Result<()> {
    let DigestAction::Run { cycle } = action;
    let config = AssistantConfig::load()?;
    let state_dir = PathBuf::from(&config.paths.state_dir);
    std::fs::create_dir_all(&state_dir)?;

    let source = FileDigestSource::open(&state_dir)?;
    let mut state = DigestState::load(&config.paths.digest_state_path())?;

    let owner = format!("{}:{}", hostname(), std::process::id());
    let lock = DigestLock::acquire(
        config.paths.digest_lock_path(),
        config.paths.digest_lock_takeover_path(),
        &owner,
        config.digest.lock_timeout_s,
        chrono::Utc::now(),
    )?;

    let today = chrono::Utc::now().date_naive();
    let run_daily = cycle == "daily" || cycle == "all";
    let run_weekly = cycle == "weekly" || cycle == "all";
    let run_archive = cycle == "archive" || cycle == "all";

    if run_daily && config.digest.daily_enable {
        let last_success = state.catch_up.recovered.then(|| today - chrono::Duration::days(1));
        let (catch_up_summaries, catch_up_state) =
            catch_up_missed_days(&source, &config.digest, last_success, today);
        for summary in &catch_up_summaries {
            println!("catch-up daily: written={} skipped={}", summary.written, summary.skipped);
        }
        state.catch_up = catch_up_state;

        let summary = run_daily_cycle(&source, &config.digest, today, CatchUpState::default());
        println!("daily: written={} skipped={} reason={:?}", summary.written, summary.skipped, summary.reason);
    }

    if run_weekly && config.digest.weekly_enable {
        let iso_week = assistantd::digest::iso_week_string(today);
        let conversation_ids: Vec<String> = source.events_on(today).iter().map(|e| e.conversation_id.clone()).collect();
        match run_weekly_cycle(&source, &config.digest, &iso_week, &conversation_ids, "weekly-source-hash", 1) {
            Ok(summary) => println!("weekly: written={} skipped={} reason={:?}", summary.written, summary.skipped, summary.reason),
            Err(e) => eprintln!("weekly cycle error: {e}"),
        }
    }

    if run_archive && config.digest.archive_enable {
        let window_start = today - chrono::Duration::days(30);
        let conversation_ids: Vec<String> = source.events_on(today).iter().map(|e| e.conversation_id.clone()).collect();
        let summary = run_archive_cycle(&source, &config.digest, window_start, today, &conversation_ids, "archive-source-hash");
        println!("archive: written={} skipped={} reason={:?}", summary.written, summary.skipped, summary.reason);
    }

    state.write(&config.paths.digest_state_path())?;
    lock.release();
    Ok(())
}

fn run_skills_action(action: &SkillsAction) -> anyhow::Result<()> {
    let SkillsAction::Validate { file, language } = action;
    let code = std::fs::read_to_string(file)?;
    let decision = validator::validate(&code, language);

    println!("action: {:?}", decision.action);
    println!("passed: {}", decision.passed);
    for reason in &decision.reasons {
        println!("reason: {reason}");
    }

    if decision.passed {
        Ok(())
    } else {
        Err(SafetyRefusal.into())
    }
}

fn run_graph_action(action: &GraphAction) -> anyhow::Result<()> {
    let GraphAction::Reconcile = action;
    let config = AssistantConfig::load()?;

    let active_ids: std::collections::HashSet<String> = match std::fs::read_to_string(config.paths.skill_registry_path()) {
        Ok(contents) => {
            let records: Vec<assistantd::skills::SkillRecord> = serde_json::from_str(&contents).unwrap_or_default();
            records.into_iter().map(|r| r.key).collect()
        }
        Err(_) => std::collections::HashSet::new(),
    };

    let nodes_path = PathBuf::from(&config.paths.state_dir).join("graph_nodes.json");
    let node_blueprint_pairs: Vec<(String, String)> = match std::fs::read_to_string(&nodes_path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
        Err(_) => Vec::new(),
    };

    let tombstoned = reconcile_orphans(&node_blueprint_pairs, &active_ids);
    println!("tombstoned {} orphaned node(s)", tombstoned.len());
    for node_id in &tombstoned {
        println!("  {node_id}");
    }
    Ok(())
}

fn run_config_action(action: &ConfigAction) -> anyhow::Result<()> {
    let ConfigAction::Check = action;
    let config = AssistantConfig::load()?;
    println!("{config:#?}");
    Ok(())
}

async fn run_start() -> std::process::ExitCode {
    let config = match AssistantConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return std::process::ExitCode::from(EXIT_CONFIG);
        }
    };

    let logs_dir = PathBuf::from(&config.paths.state_dir).join("logs");
    let _logging_guard = match assistantd::logging::init_production(&logs_dir) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("failed to initialise logging: {e}");
            return std::process::ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing::info!("assistantd starting");

    let state_dir = PathBuf::from(&config.paths.state_dir);
    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        tracing::error!(error = %e, "state directory is not writable");
        return std::process::ExitCode::from(EXIT_CONFIG);
    }

    let server_state = match build_server_state(&config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "startup dependency unavailable");
            return std::process::ExitCode::from(EXIT_DEPENDENCY);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&config.api.bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.api.bind_addr, error = %e, "cannot bind runtime API address");
            return std::process::ExitCode::from(EXIT_DEPENDENCY);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let start_time = Instant::now();

    let server_handle = {
        let state = Arc::clone(&server_state);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(listener, state, rx).await {
                tracing::error!(error = %e, "runtime API server stopped with an error");
            }
        })
    };

    let digest_handle = if matches!(config.digest.run_mode, DigestRunMode::Off) || !config.digest.enable {
        None
    } else {
        let config = config.clone();
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            run_digest_worker(config, &mut rx).await;
        }))
    };

    let health_handle = {
        let config = config.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            run_health_worker(config, start_time, &mut rx).await;
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        _ = shutdown_rx.changed() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;
    if let Some(handle) = digest_handle {
        let _ = handle.await;
    }
    let _ = health_handle.await;

    tracing::info!(uptime_secs = start_time.elapsed().as_secs(), "assistantd stopped");
    std::process::ExitCode::SUCCESS
}

/// Resolve the SQL-memory embedding target through the embedding router
/// (caller role `sql_memory_embedding`). A hard routing error means the
/// memory engine runs without vector search rather than failing startup —
/// FTS5 keeps working either way.
async fn resolve_memory_embedder(
    config: &AssistantConfig,
) -> Option<std::sync::Arc<dyn assistantd::memory::embedder::Embedder>> {
    use assistantd::embedding::{EmbeddingRouter, HttpAvailabilityProbe, Target};
    use assistantd::memory::embedder::OllamaEmbedder;

    let cpu_base_url = config.embedding.cpu_base_url.clone();
    let gpu_base_url = config.embedding.gpu_base_url.clone();
    let cache_ttl = Duration::from_secs(config.embedding.availability_cache_ttl_secs);
    let policy = config.embedding.runtime_policy;

    // The probe's HTTP client is blocking; build and resolve off the
    // async runtime.
    let decision = tokio::task::spawn_blocking(move || {
        let probe = HttpAvailabilityProbe::new(cpu_base_url, gpu_base_url)
            .map_err(|e| {
                tracing::warn!(error = %e, "embedding availability probe unavailable");
            })
            .ok()?;
        let router = EmbeddingRouter::new(Box::new(probe), cache_ttl);
        Some(router.resolve(policy, None))
    })
    .await
    .ok()??;

    let base_url = match decision.effective_target {
        Some(Target::Cpu) => &config.embedding.cpu_base_url,
        Some(Target::Gpu) => &config.embedding.gpu_base_url,
        None => {
            tracing::error!(
                policy = %config.embedding.runtime_policy,
                error_code = decision.error_code,
                "no embedding target available, vector search disabled"
            );
            return None;
        }
    };

    Some(std::sync::Arc::new(OllamaEmbedder::new(
        &config.embedding.model,
        base_url,
        config.embedding.dims,
    )))
}

/// Build every collaborator the runtime API needs. Failures here are
/// startup dependency failures (exit code 2), not config errors.
async fn build_server_state(config: &AssistantConfig) -> anyhow::Result<Arc<ServerState>> {
    let state_dir = PathBuf::from(&config.paths.state_dir);

    let db_url = format!("sqlite://{}?mode=rwc", config.paths.memory_db_path().display());
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&db_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let embedder = resolve_memory_embedder(config).await;
    let memory = Arc::new(MemoryEngine::new(pool, embedder).await?);

    let tools_dir = config.paths.tools_dir();
    std::fs::create_dir_all(&tools_dir)?;
    let tool_registry = ToolRegistry::new(tools_dir)?;

    let credentials = assistantd::credentials::load_credentials(&config.paths.env_file_path())
        .unwrap_or_else(|e| {
            tracing::info!(reason = %e, "no tool-server credentials loaded");
            assistantd::credentials::Credentials::from_map(Default::default())
        });

    // A tool-server's domain is trusted by virtue of being registered.
    let allowed_domains: HashSet<String> = tool_registry
        .catalog()
        .iter()
        .filter_map(|entry| tool_registry.get(&entry.name))
        .filter_map(|schema| {
            url::Url::parse(&schema.endpoint)
                .ok()
                .and_then(|u| u.host_str().map(str::to_owned))
        })
        .collect();
    let tool_hub = Arc::new(HttpToolHub::new(
        Arc::clone(&tool_registry),
        allowed_domains,
        credentials,
    ));

    let skill_registry = Arc::new(SkillRegistry::load(config.paths.skill_registry_path())?);
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

    let provider = Arc::new(HttpInferenceProvider::new(
        config.pipeline.llm_base_url.clone(),
        config.pipeline.stage_timeout_secs,
    )?);

    let digest_source = Arc::new(FileDigestSource::open(&state_dir)?);
    let context_source = Arc::new(EngineContextSource::new(
        Arc::clone(&memory),
        skill_registry,
        Arc::clone(&tool_registry),
        digest_source,
        provider.clone(),
        config.pipeline.model.clone(),
        config.paths.persona_path(),
    ));

    Ok(Arc::new(ServerState {
        config: config.clone(),
        memory,
        context_source,
        provider,
        tools: tool_hub,
        authority,
        allowlist,
        jobs: Arc::new(JobStore::default()),
    }))
}

async fn run_digest_worker(config: AssistantConfig, shutdown_rx: &mut tokio::sync::watch::Receiver<bool>) {
    let state_dir = PathBuf::from(&config.paths.state_dir);
    if let Err(e) = std::fs::create_dir_all(&state_dir) {
        tracing::error!(error = %e, "failed to create state directory");
        return;
    }

    let source = match FileDigestSource::open(&state_dir) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open digest source");
            return;
        }
    };

    let mut tick = tokio::time::interval(Duration::from_secs(60));
    let mut last_run: Option<chrono::DateTime<chrono::Local>> = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = chrono::Local::now();
                if should_trigger(now, last_run) {
                    let today = now.date_naive();
                    let (_, catch_up_state) = catch_up_missed_days(&source, &config.digest, None, today);
                    let summary = run_daily_cycle(&source, &config.digest, today, catch_up_state);
                    assistantd::telemetry::Event::DigestCycleCompleted {
                        cycle: "daily",
                        digest_key: summary.conversation_ids.first().cloned(),
                        skipped: summary.skipped > 0,
                    }
                    .record();
                    last_run = Some(now);
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("digest worker shutting down");
                    break;
                }
            }
        }
    }
}

async fn run_health_worker(
    config: AssistantConfig,
    start_time: Instant,
    shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
) {
    let health_path = PathBuf::from(&config.paths.state_dir).join("health.json");
    let mut tick = tokio::time::interval(Duration::from_secs(30));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let report = assistantd::health::check_health(&config, start_time);
                if let Err(e) = assistantd::health::write_health_file(&report, &health_path) {
                    tracing::warn!(error = %e, "failed to write health.json");
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "assistantd-host".to_owned())
}
