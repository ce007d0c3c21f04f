//! Configuration loading and management.
//!
//! Loads the runtime configuration from `./config.toml` (or
//! `$ASSISTANTD_CONFIG_PATH`). Environment variables override file values;
//! file values override built-in defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::ParseEnumError;

/// Top-level runtime configuration loaded from TOML.
///
/// Path: `./config.toml` or `$ASSISTANTD_CONFIG_PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Skill authority and package policy settings.
    pub skills: SkillAuthorityConfig,
    /// Digest pipeline scheduling and behavior settings.
    pub digest: DigestConfig,
    /// Context builder budget and JIT-loading settings.
    pub context: ContextConfig,
    /// Embedding router policy settings.
    pub embedding: EmbeddingConfig,
    /// Layered pipeline timing and loop-bound settings.
    pub pipeline: PipelineConfig,
    /// Runtime API server settings.
    pub api: ApiConfig,
    /// Filesystem paths for persistent state.
    pub paths: PathsConfig,
}

impl AssistantConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: AssistantConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(AssistantConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("ASSISTANTD_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var`
    /// manipulation in tests).
    ///
    /// # Errors
    ///
    /// Returns an error when an env var holds a value that cannot be parsed
    /// into its target type (numeric fields, enum fields).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("SKILL_CONTROL_AUTHORITY") {
            self.skills.authority = AuthorityMode::from_str(&v)
                .context("invalid SKILL_CONTROL_AUTHORITY")?;
        }
        if let Some(v) = env("SKILL_PACKAGE_INSTALL_MODE") {
            self.skills.package_install_mode = PackageInstallMode::from_str(&v)
                .context("invalid SKILL_PACKAGE_INSTALL_MODE")?;
        }

        if let Some(v) = env("DIGEST_ENABLE") {
            self.digest.enable = parse_bool(&v, "DIGEST_ENABLE")?;
        }
        if let Some(v) = env("DIGEST_DAILY_ENABLE") {
            self.digest.daily_enable = parse_bool(&v, "DIGEST_DAILY_ENABLE")?;
        }
        if let Some(v) = env("DIGEST_WEEKLY_ENABLE") {
            self.digest.weekly_enable = parse_bool(&v, "DIGEST_WEEKLY_ENABLE")?;
        }
        if let Some(v) = env("DIGEST_ARCHIVE_ENABLE") {
            self.digest.archive_enable = parse_bool(&v, "DIGEST_ARCHIVE_ENABLE")?;
        }
        if let Some(v) = env("DIGEST_RUN_MODE") {
            self.digest.run_mode =
                DigestRunMode::from_str(&v).context("invalid DIGEST_RUN_MODE")?;
        }
        if let Some(v) = env("DIGEST_CATCHUP_MAX_DAYS") {
            self.digest.catchup_max_days = v.parse().context("invalid DIGEST_CATCHUP_MAX_DAYS")?;
        }
        if let Some(v) = env("DIGEST_MIN_EVENTS_DAILY") {
            self.digest.min_events_daily =
                v.parse().context("invalid DIGEST_MIN_EVENTS_DAILY")?;
        }
        if let Some(v) = env("DIGEST_MIN_DAILY_PER_WEEK") {
            self.digest.min_daily_per_week =
                v.parse().context("invalid DIGEST_MIN_DAILY_PER_WEEK")?;
        }
        if let Some(v) = env("DIGEST_DEDUPE_INCLUDE_CONV") {
            self.digest.dedupe_include_conv = parse_bool(&v, "DIGEST_DEDUPE_INCLUDE_CONV")?;
        }
        if let Some(v) = env("DIGEST_KEY_VERSION") {
            self.digest.key_version =
                DigestKeyVersion::from_str(&v).context("invalid DIGEST_KEY_VERSION")?;
        }
        if let Some(v) = env("DIGEST_RUNTIME_API_V2") {
            self.digest.runtime_api_v2 = parse_bool(&v, "DIGEST_RUNTIME_API_V2")?;
        }
        if let Some(v) = env("DIGEST_LOCK_TIMEOUT_S") {
            self.digest.lock_timeout_s = v.parse().context("invalid DIGEST_LOCK_TIMEOUT_S")?;
        }

        if let Some(v) = env("TYPEDSTATE_MODE") {
            self.context.typedstate_mode =
                TypedStateMode::from_str(&v).context("invalid TYPEDSTATE_MODE")?;
        }
        if let Some(v) = env("TYPEDSTATE_CSV_JIT_ONLY") {
            self.context.jit_only = parse_bool(&v, "TYPEDSTATE_CSV_JIT_ONLY")?;
        }
        if let Some(v) = env("JIT_WINDOW_TIME_REFERENCE_H") {
            self.context.jit_window_time_reference_h =
                v.parse().context("invalid JIT_WINDOW_TIME_REFERENCE_H")?;
        }
        if let Some(v) = env("JIT_WINDOW_FACT_RECALL_H") {
            self.context.jit_window_fact_recall_h =
                v.parse().context("invalid JIT_WINDOW_FACT_RECALL_H")?;
        }
        if let Some(v) = env("JIT_WINDOW_REMEMBER_H") {
            self.context.jit_window_remember_h =
                v.parse().context("invalid JIT_WINDOW_REMEMBER_H")?;
        }
        if let Some(v) = env("CONTEXT_FINAL_CAP") {
            self.context.final_cap = v.parse().context("invalid CONTEXT_FINAL_CAP")?;
        }

        if let Some(v) = env("EMBEDDING_RUNTIME_POLICY") {
            self.embedding.runtime_policy =
                EmbeddingPolicy::from_str(&v).context("invalid EMBEDDING_RUNTIME_POLICY")?;
        }

        if let Some(v) = env("SIGNATURE_VERIFY_MODE") {
            self.skills.signature_verify_mode = SignatureVerifyMode::from_str(&v)
                .context("invalid SIGNATURE_VERIFY_MODE")?;
        }

        if let Some(v) = env("PIPELINE_MAX_TOOL_LOOPS") {
            self.pipeline.max_tool_loops = v.parse().context("invalid PIPELINE_MAX_TOOL_LOOPS")?;
        }
        if let Some(v) = env("PIPELINE_STAGE_TIMEOUT_SECS") {
            self.pipeline.stage_timeout_secs =
                v.parse().context("invalid PIPELINE_STAGE_TIMEOUT_SECS")?;
        }
        if let Some(v) = env("PIPELINE_MODEL") {
            self.pipeline.model = v;
        }
        if let Some(v) = env("PIPELINE_CODE_MODEL") {
            self.pipeline.code_model = v;
        }
        if let Some(v) = env("LLM_BASE_URL") {
            self.pipeline.llm_base_url = v;
        }

        if let Some(v) = env("ASSISTANTD_API_ADDR") {
            self.api.bind_addr = v;
        }

        if let Some(v) = env("ASSISTANTD_STATE_DIR") {
            self.paths.state_dir = v;
        }

        Ok(())
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when the string is not valid TOML for this schema.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("failed to parse config TOML")
    }
}

fn parse_bool(v: &str, field: &'static str) -> Result<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("invalid {field}: {other:?}")),
    }
}

// ── Skill authority & package policy config ────────────────────────────

/// Which component validates a skill-create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityMode {
    /// The skill authority validates; the executor is a pure side-effect owner. Default.
    SkillServer,
    /// Rollback mode: the executor validates, the authority bypasses.
    LegacyDual,
}

impl Default for AuthorityMode {
    fn default() -> Self {
        Self::SkillServer
    }
}

impl std::fmt::Display for AuthorityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SkillServer => "skill_server",
            Self::LegacyDual => "legacy_dual",
        };
        f.write_str(s)
    }
}

impl FromStr for AuthorityMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skill_server" => Ok(Self::SkillServer),
            "legacy_dual" => Ok(Self::LegacyDual),
            other => Err(ParseEnumError {
                field: "authority",
                value: other.to_owned(),
            }),
        }
    }
}

/// How requested packages are classified and (not) auto-installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageInstallMode {
    /// Classify against the allowlist; auto-install allowlisted packages. Default.
    AllowlistAuto,
    /// Always require manual installation; never auto-install.
    ManualOnly,
}

impl Default for PackageInstallMode {
    fn default() -> Self {
        Self::AllowlistAuto
    }
}

impl std::fmt::Display for PackageInstallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AllowlistAuto => "allowlist_auto",
            Self::ManualOnly => "manual_only",
        };
        f.write_str(s)
    }
}

impl FromStr for PackageInstallMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allowlist_auto" => Ok(Self::AllowlistAuto),
            "manual_only" => Ok(Self::ManualOnly),
            other => Err(ParseEnumError {
                field: "package_install_mode",
                value: other.to_owned(),
            }),
        }
    }
}

/// Whether dynamic skill signatures are verified before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureVerifyMode {
    /// Never verify signatures. Default.
    Off,
    /// Verify when a signature is present; unsigned skills still run.
    OptIn,
    /// Reject unsigned or invalidly signed skills outright.
    Strict,
}

impl Default for SignatureVerifyMode {
    fn default() -> Self {
        Self::Off
    }
}

impl std::fmt::Display for SignatureVerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::OptIn => "opt_in",
            Self::Strict => "strict",
        };
        f.write_str(s)
    }
}

impl FromStr for SignatureVerifyMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "opt_in" => Ok(Self::OptIn),
            "strict" => Ok(Self::Strict),
            other => Err(ParseEnumError {
                field: "signature_verify_mode",
                value: other.to_owned(),
            }),
        }
    }
}

/// Skill authority and package policy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillAuthorityConfig {
    /// Which component validates skill-create requests.
    pub authority: AuthorityMode,
    /// How requested packages are classified.
    pub package_install_mode: PackageInstallMode,
    /// Signature verification strictness for dynamic skills.
    pub signature_verify_mode: SignatureVerifyMode,
    /// TTL, in seconds, for the cached package allowlist.
    pub allowlist_cache_ttl_secs: u64,
}

impl Default for SkillAuthorityConfig {
    fn default() -> Self {
        Self {
            authority: AuthorityMode::default(),
            package_install_mode: PackageInstallMode::default(),
            signature_verify_mode: SignatureVerifyMode::default(),
            allowlist_cache_ttl_secs: 60,
        }
    }
}

// ── Digest pipeline config ──────────────────────────────────────────────

/// Where the digest scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestRunMode {
    /// Digest scheduling disabled entirely.
    Off,
    /// Long-lived dedicated worker process.
    Sidecar,
    /// In-process thread/task. Default.
    Inline,
}

impl Default for DigestRunMode {
    fn default() -> Self {
        Self::Inline
    }
}

impl std::fmt::Display for DigestRunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Sidecar => "sidecar",
            Self::Inline => "inline",
        };
        f.write_str(s)
    }
}

impl FromStr for DigestRunMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "sidecar" => Ok(Self::Sidecar),
            "inline" => Ok(Self::Inline),
            other => Err(ParseEnumError {
                field: "digest_run_mode",
                value: other.to_owned(),
            }),
        }
    }
}

/// Digest key schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestKeyVersion {
    /// Legacy key shape, no window bounds.
    V1,
    /// Current key shape, binds window bounds. Default.
    V2,
}

impl Default for DigestKeyVersion {
    fn default() -> Self {
        Self::V2
    }
}

impl std::fmt::Display for DigestKeyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::V1 => "v1",
            Self::V2 => "v2",
        };
        f.write_str(s)
    }
}

impl FromStr for DigestKeyVersion {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(ParseEnumError {
                field: "digest_key_version",
                value: other.to_owned(),
            }),
        }
    }
}

/// Digest pipeline scheduling and behavior settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Master enable switch for the digest pipeline.
    pub enable: bool,
    /// Enable the daily cycle.
    pub daily_enable: bool,
    /// Enable the weekly cycle.
    pub weekly_enable: bool,
    /// Enable the archive cycle.
    pub archive_enable: bool,
    /// Where the scheduler runs.
    pub run_mode: DigestRunMode,
    /// Maximum missed days replayed by catch-up.
    pub catchup_max_days: u32,
    /// Minimum input events required to write a daily digest.
    pub min_events_daily: u32,
    /// Minimum daily-key count required to write a weekly digest.
    pub min_daily_per_week: u32,
    /// Include conversation id in the dedupe key.
    pub dedupe_include_conv: bool,
    /// Digest key schema version.
    pub key_version: DigestKeyVersion,
    /// Serve the v2 runtime API shape (false = legacy v1 shape).
    pub runtime_api_v2: bool,
    /// Digest lock timeout, seconds, before stale takeover is eligible.
    pub lock_timeout_s: u64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            enable: false,
            daily_enable: true,
            weekly_enable: true,
            archive_enable: true,
            run_mode: DigestRunMode::default(),
            catchup_max_days: 7,
            min_events_daily: 0,
            min_daily_per_week: 0,
            dedupe_include_conv: true,
            key_version: DigestKeyVersion::default(),
            runtime_api_v2: true,
            lock_timeout_s: 300,
        }
    }
}

// ── Context builder config ──────────────────────────────────────────────

/// Shadow/active rollout state for the typed-state context renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedStateMode {
    /// Rendered but not relied on; legacy renderer still authoritative.
    Shadow,
    /// Authoritative. Default.
    Active,
}

impl Default for TypedStateMode {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for TypedStateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Shadow => "shadow",
            Self::Active => "active",
        };
        f.write_str(s)
    }
}

impl FromStr for TypedStateMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shadow" => Ok(Self::Shadow),
            "active" => Ok(Self::Active),
            other => Err(ParseEnumError {
                field: "typedstate_mode",
                value: other.to_owned(),
            }),
        }
    }
}

/// Context builder budget and JIT-loading settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard character budget for the assembled prompt.
    pub final_cap: usize,
    /// Typed-state renderer rollout mode.
    pub typedstate_mode: TypedStateMode,
    /// Whether CSV digest events are loaded only on a recognized trigger.
    pub jit_only: bool,
    /// JIT window, hours, for the `time_reference` trigger.
    pub jit_window_time_reference_h: u32,
    /// JIT window, hours, for the `fact_recall` trigger.
    pub jit_window_fact_recall_h: u32,
    /// JIT window, hours, for the `remember` trigger.
    pub jit_window_remember_h: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            final_cap: 24_000,
            typedstate_mode: TypedStateMode::default(),
            jit_only: true,
            jit_window_time_reference_h: 48,
            jit_window_fact_recall_h: 168,
            jit_window_remember_h: 336,
        }
    }
}

// ── Embedding router config ─────────────────────────────────────────────

/// Routing policy for embedding generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPolicy {
    /// Prefer GPU, fall back to CPU, hard-error if neither is up.
    Auto,
    /// Prefer GPU; fall back to CPU with a warning if it's down.
    PreferGpu,
    /// Never route to GPU.
    CpuOnly,
}

impl Default for EmbeddingPolicy {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for EmbeddingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::PreferGpu => "prefer_gpu",
            Self::CpuOnly => "cpu_only",
        };
        f.write_str(s)
    }
}

impl FromStr for EmbeddingPolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "prefer_gpu" => Ok(Self::PreferGpu),
            "cpu_only" => Ok(Self::CpuOnly),
            other => Err(ParseEnumError {
                field: "embedding_policy",
                value: other.to_owned(),
            }),
        }
    }
}

/// Embedding router policy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Default routing policy applied when a caller doesn't pin one.
    pub runtime_policy: EmbeddingPolicy,
    /// TTL, seconds, for the per-target availability cache.
    pub availability_cache_ttl_secs: u64,
    /// Base URL of the CPU-hosted embedding target.
    pub cpu_base_url: String,
    /// Base URL of the GPU-hosted embedding target.
    pub gpu_base_url: String,
    /// Embedding model name.
    pub model: String,
    /// Embedding vector dimensionality.
    pub dims: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            runtime_policy: EmbeddingPolicy::default(),
            availability_cache_ttl_secs: 30,
            cpu_base_url: "http://127.0.0.1:11434".to_owned(),
            gpu_base_url: "http://127.0.0.1:11435".to_owned(),
            model: "nomic-embed-text".to_owned(),
            dims: 768,
        }
    }
}

// ── Layered pipeline config ─────────────────────────────────────────────

/// Layered pipeline timing and loop-bound settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum tool-loop iterations in the output layer.
    pub max_tool_loops: u32,
    /// Per-stage LLM call timeout, seconds.
    pub stage_timeout_secs: u64,
    /// Default model for the thinking/control/output stages.
    pub model: String,
    /// Code-specialized model the output layer switches to for
    /// code-heavy intents.
    pub code_model: String,
    /// Base URL of the local inference endpoint.
    pub llm_base_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: 6,
            stage_timeout_secs: 120,
            model: "llama3.1".to_owned(),
            code_model: "qwen2.5-coder".to_owned(),
            llm_base_url: "http://127.0.0.1:11434".to_owned(),
        }
    }
}

// ── Runtime API server config ────────────────────────────────────────────

/// Runtime API server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address the runtime API server binds to.
    pub bind_addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8741".to_owned(),
        }
    }
}

// ── Paths config ─────────────────────────────────────────────────────────

/// Filesystem paths for persistent state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory for runtime state
    /// (digest state, locks, CSV sources, skill registry).
    pub state_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: "./memory_speicher".to_owned(),
        }
    }
}

impl PathsConfig {
    /// Path to the digest state file.
    pub fn digest_state_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("digest_state.json")
    }

    /// Path to the digest lock file.
    pub fn digest_lock_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("digest.lock")
    }

    /// Path to the digest lock's takeover sentinel.
    pub fn digest_lock_takeover_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("digest.lock.takeover")
    }

    /// Path to the skill registry's authoritative truth store.
    pub fn skill_registry_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("installed.json")
    }

    /// Path to the `.env` file holding tool-server bearer credentials.
    pub fn env_file_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join(".env")
    }

    /// Path to the package allowlist file.
    pub fn allowlist_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("allowlist.json")
    }

    /// Path to the system persona file.
    pub fn persona_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("persona.md")
    }

    /// Directory holding tool descriptor JSON files.
    pub fn tools_dir(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("tools")
    }

    /// Path to the SQLite memory database.
    pub fn memory_db_path(&self) -> PathBuf {
        PathBuf::from(&self.state_dir).join("memory.db")
    }
}

/// Resolve the default state directory root under `~/.assistantd`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_root_dir() -> Result<PathBuf> {
    let base = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(base.home_dir().join(".assistantd"))
}
