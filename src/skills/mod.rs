//! Single control authority for skill creation and package policy.
//!
//! Exactly one component validates a skill-create request. In the default
//! `authority=skill_server` configuration that component is
//! [`SkillAuthority`]; the [`executor::SkillExecutor`] it delegates to is a
//! pure side-effect owner that refuses to act without a matching
//! [`crate::types::ControlDecision`].

pub mod allowlist;
pub mod executor;
pub mod registry;
pub mod validator;

use sha2::{Digest, Sha256};

use crate::config::{AuthorityMode, PackageInstallMode};
use crate::types::ControlDecision;

use self::executor::SkillExecutor;
use self::registry::SkillRegistry;

/// Authority tag this module stamps on every decision it issues.
pub const AUTHORITY_SOURCE: &str = "skill_server";

/// Errors from skill authority operations.
#[derive(Debug, thiserror::Error)]
pub enum SkillAuthorityError {
    /// The package allowlist could not be fetched; treated as empty
    /// (fail-closed), but surfaced for logging.
    #[error("allowlist unavailable: {0}")]
    AllowlistUnavailable(String),

    /// The executor rejected a create call because the authority contract
    /// was not satisfied.
    #[error("rejected by authority: {reason}")]
    RejectedByAuthority {
        /// Machine-readable reason code (`missing_authority_decision` or
        /// `rejected_by_authority`).
        reason: &'static str,
    },

    /// The truth-store read or write failed.
    #[error("registry error: {0}")]
    Registry(#[from] std::io::Error),

    /// The registry file held malformed JSON.
    #[error("registry corrupt: {0}")]
    RegistryCorrupt(#[from] serde_json::Error),
}

impl SkillAuthorityError {
    /// Which propagation-policy band this error falls into.
    pub fn propagation_policy(&self) -> crate::types::ErrorKind {
        match self {
            Self::AllowlistUnavailable(_) => crate::types::ErrorKind::TransientIo,
            Self::RejectedByAuthority { .. } => crate::types::ErrorKind::AuthorityViolation,
            Self::Registry(_) => crate::types::ErrorKind::TransientIo,
            Self::RegistryCorrupt(_) => crate::types::ErrorKind::Parse,
        }
    }
}

/// Lifecycle status of a [`SkillRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStatus {
    /// In active use.
    Active,
    /// Created but not yet promoted.
    Draft,
    /// No longer in use; superseded by a newer record with the same key.
    Revoked,
}

/// Truth record for one installed skill (unique by `key`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SkillRecord {
    /// Skill name.
    pub name: String,
    /// Monotonically bumped on update.
    pub version: u32,
    /// Lifecycle status.
    pub status: SkillStatus,
    /// Deterministic `hash(name, normalized_code, language)`.
    pub key: String,
}

/// A request to create or update a skill.
#[derive(Debug, Clone)]
pub struct SkillCreateRequest {
    /// Skill name.
    pub name: String,
    /// Source code.
    pub code: String,
    /// Implementation language tag (`python`, `bash`, ...).
    pub language: String,
    /// Packages the code declares it needs.
    pub requested_packages: Vec<String>,
    /// Decision produced by the control layer, if any.
    pub control_decision: Option<ControlDecision>,
}

/// Outcome of a create attempt.
#[derive(Debug, Clone)]
pub enum SkillCreateOutcome {
    /// The skill was created or updated.
    Created(SkillRecord),
    /// At least one requested package is not allowlisted.
    PendingPackageApproval {
        /// Skill name from the original request.
        skill_name: String,
        /// Packages not found on the allowlist.
        missing_packages: Vec<String>,
    },
    /// The safety validator blocked the request outright.
    Blocked {
        /// Reasons from the control decision.
        reasons: Vec<String>,
    },
    /// The safety validator escalated the request for manual approval.
    Escalated {
        /// Reasons from the control decision.
        reasons: Vec<String>,
    },
}

/// Pushes a created/updated skill record into the graph index so it becomes
/// visible to the graph hygiene pass.
///
/// Sync-on-create is weak: a failure here does not fail the create call and
/// is not retried inline. The periodic `graph reconcile` pass
/// ([`crate::graph::reconcile_orphans`]) is the eventual-consistency
/// backstop — a skill whose sync attempt was lost is simply absent from the
/// graph index until the next reconcile pass notices the mismatch and a
/// future sync attempt (the next update, or a manual re-sync) fills it in.
/// This trades a narrow window of staleness for never blocking skill
/// creation on an index that is not the authoritative store.
#[async_trait::async_trait]
pub trait GraphIndexSync: Send + Sync {
    /// Best-effort push of `record` into the graph index.
    async fn sync(&self, record: &SkillRecord) -> Result<(), String>;
}

/// Classifies requested packages against an allowlist.
#[async_trait::async_trait]
pub trait PackageClassifier: Send + Sync {
    /// Returns the subset of `packages` that are NOT allowlisted.
    ///
    /// Fail-closed: implementations that cannot fetch the allowlist should
    /// return `Err`, which the caller treats as "the whole set is
    /// non-allowlisted".
    async fn non_allowlisted(
        &self,
        packages: &[String],
    ) -> Result<Vec<String>, SkillAuthorityError>;
}

#[async_trait::async_trait]
impl<T: PackageClassifier> PackageClassifier for std::sync::Arc<T> {
    async fn non_allowlisted(
        &self,
        packages: &[String],
    ) -> Result<Vec<String>, SkillAuthorityError> {
        (**self).non_allowlisted(packages).await
    }
}

/// Deterministic skill key: `hash(name, normalized_code, language)`.
///
/// Normalization here is whitespace-trimming only — the exact transform is
/// an implementation detail, but it must be idempotent and applied
/// identically on every call so dedupe is stable.
pub fn skill_key(name: &str, code: &str, language: &str) -> String {
    let normalized_code: String = code.trim().lines().map(str::trim_end).collect::<Vec<_>>().join("\n");
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized_code.as_bytes());
    hasher.update(b"\0");
    hasher.update(language.as_bytes());
    let digest = hasher.finalize();
    hex_prefix(&digest, 32)
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut s = String::with_capacity(len);
    for b in bytes {
        if s.len() >= len {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(len);
    s
}

/// The single control authority for skill creation.
pub struct SkillAuthority {
    mode: AuthorityMode,
    package_mode: PackageInstallMode,
    classifier: Box<dyn PackageClassifier>,
    executor: Box<dyn SkillExecutor>,
    registry: std::sync::Arc<SkillRegistry>,
    graph_index: Option<Box<dyn GraphIndexSync>>,
}

impl SkillAuthority {
    /// Build a new authority. `graph_index` is optional: `None` means the
    /// deployment runs without a graph index, so sync-on-create is skipped
    /// entirely and `graph reconcile` has nothing to reconcile against.
    pub fn new(
        mode: AuthorityMode,
        package_mode: PackageInstallMode,
        classifier: Box<dyn PackageClassifier>,
        executor: Box<dyn SkillExecutor>,
        registry: std::sync::Arc<SkillRegistry>,
        graph_index: Option<Box<dyn GraphIndexSync>>,
    ) -> Self {
        Self {
            mode,
            package_mode,
            classifier,
            executor,
            registry,
            graph_index,
        }
    }

    /// The authoritative truth store this authority persists into.
    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Classify `requested` against the allowlist per the configured
    /// package-install mode, returning the packages that need approval
    /// before a create may proceed (empty when none do).
    ///
    /// Fail-closed: an unreachable or unreadable allowlist makes every
    /// requested package count as needing approval.
    pub async fn pending_packages(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            return Vec::new();
        }
        match self.package_mode {
            // manual_only never auto-installs anything.
            PackageInstallMode::ManualOnly => requested.to_vec(),
            PackageInstallMode::AllowlistAuto => {
                match self.classifier.non_allowlisted(requested).await {
                    Ok(missing) => missing,
                    Err(_) => requested.to_vec(),
                }
            }
        }
    }

    /// Run the full create flow.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure failures (registry I/O);
    /// policy outcomes are returned as [`SkillCreateOutcome`] variants.
    pub async fn create(
        &self,
        request: SkillCreateRequest,
    ) -> Result<SkillCreateOutcome, SkillAuthorityError> {
        let missing = self.pending_packages(&request.requested_packages).await;
        if !missing.is_empty() {
            return Ok(SkillCreateOutcome::PendingPackageApproval {
                skill_name: request.name,
                missing_packages: missing,
            });
        }

        let decision = validator::validate(&request.code, &request.language);

        if !decision.passed || matches!(decision.action, crate::types::ControlAction::Block) {
            return Ok(SkillCreateOutcome::Blocked {
                reasons: decision.reasons,
            });
        }
        if matches!(decision.action, crate::types::ControlAction::Escalate) {
            return Ok(SkillCreateOutcome::Escalated {
                reasons: decision.reasons,
            });
        }

        let authoritative_decision = match self.mode {
            AuthorityMode::SkillServer => Some(decision),
            // Open question (a): in legacy_dual mode the authority side is
            // bypassed and the executor is the sole validator; we pick the
            // executor's own decision as the single deterministic winner
            // rather than attempting to reconcile two verdicts.
            AuthorityMode::LegacyDual => None,
        };

        let key = skill_key(&request.name, &request.code, &request.language);
        let record = self
            .executor
            .create(&request, authoritative_decision.as_ref(), &key)
            .await?;

        self.registry.upsert(record.clone())?;

        if let Some(graph_index) = &self.graph_index {
            if let Err(reason) = graph_index.sync(&record).await {
                tracing::warn!(skill = %record.name, key = %record.key, %reason, "graph index sync-on-create failed, deferring to reconcile");
            }
        }

        Ok(SkillCreateOutcome::Created(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthorityMode, PackageInstallMode};
    use executor::DirectSkillExecutor;
    use registry::SkillRegistry;

    struct AllowAllClassifier;
    #[async_trait::async_trait]
    impl PackageClassifier for AllowAllClassifier {
        async fn non_allowlisted(&self, _packages: &[String]) -> Result<Vec<String>, SkillAuthorityError> {
            Ok(Vec::new())
        }
    }

    struct FailingGraphIndex;
    #[async_trait::async_trait]
    impl GraphIndexSync for FailingGraphIndex {
        async fn sync(&self, _record: &SkillRecord) -> Result<(), String> {
            Err("index unreachable".to_owned())
        }
    }

    #[tokio::test]
    async fn create_succeeds_even_when_graph_index_sync_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = SkillRegistry::load(dir.path().join("installed.json")).expect("load");
        let authority = SkillAuthority::new(
            AuthorityMode::SkillServer,
            PackageInstallMode::AllowlistAuto,
            Box::new(AllowAllClassifier),
            Box::new(DirectSkillExecutor::new(AuthorityMode::SkillServer)),
            std::sync::Arc::new(registry),
            Some(Box::new(FailingGraphIndex)),
        );

        let outcome = authority
            .create(SkillCreateRequest {
                name: "demo".to_owned(),
                code: "print(1)".to_owned(),
                language: "python".to_owned(),
                requested_packages: Vec::new(),
                control_decision: None,
            })
            .await
            .expect("create should not fail on a graph index error");

        assert!(matches!(outcome, SkillCreateOutcome::Created(_)));
    }

    #[test]
    fn skill_key_is_deterministic_and_normalizes_trailing_whitespace() {
        let a = skill_key("demo", "print('hi')  \n", "python");
        let b = skill_key("demo", "print('hi')\n", "python");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn skill_key_differs_by_name() {
        let a = skill_key("demo", "x", "python");
        let b = skill_key("other", "x", "python");
        assert_ne!(a, b);
    }
}
