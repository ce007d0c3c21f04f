//! Pure side-effect owner for skill creation.
//!
//! Per the authority contract, a [`SkillExecutor`] must never
//! act on a `create` request unless it carries a [`ControlDecision`] that is
//! actionable for the `"skill_server"` source. Everything else about a
//! concrete executor (writing files, spawning a sandboxed interpreter) is an
//! implementation detail of `execute()`.

use crate::config::AuthorityMode;
use crate::types::ControlDecision;

use super::{skill_key, validator, SkillAuthorityError, SkillCreateRequest, SkillRecord, SkillStatus, AUTHORITY_SOURCE};

/// A component that performs the actual side effects of creating a skill.
#[async_trait::async_trait]
pub trait SkillExecutor: Send + Sync {
    /// Create (or update) a skill on disk/in whatever backing store this
    /// executor owns, returning its authoritative [`SkillRecord`].
    ///
    /// `decision` is `Some` only when the authority runs in
    /// `authority=skill_server` mode; in `legacy_dual` mode the executor is
    /// itself the sole validator and `decision` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SkillAuthorityError::RejectedByAuthority`] if the contract
    /// in [`enforce_authority_contract`] is violated.
    async fn create(
        &self,
        request: &SkillCreateRequest,
        decision: Option<&ControlDecision>,
        key: &str,
    ) -> Result<SkillRecord, SkillAuthorityError>;
}

/// Enforce the authority contract for `authority=skill_server`: `create`
/// requests without a present, actionable, correctly-sourced decision are
/// rejected outright.
///
/// # Errors
///
/// Returns [`SkillAuthorityError::RejectedByAuthority`] with
/// `missing_authority_decision` when `decision` is `None`, or
/// `rejected_by_authority` when it is present but not actionable.
pub fn enforce_authority_contract(
    decision: Option<&ControlDecision>,
) -> Result<(), SkillAuthorityError> {
    match decision {
        None => Err(SkillAuthorityError::RejectedByAuthority {
            reason: "missing_authority_decision",
        }),
        Some(d) if !d.is_actionable(AUTHORITY_SOURCE) => Err(SkillAuthorityError::RejectedByAuthority {
            reason: "rejected_by_authority",
        }),
        Some(_) => Ok(()),
    }
}

/// Default executor: enforces the contract, then writes nothing beyond
/// producing the [`SkillRecord`] the authority persists into the registry.
/// Script/file materialization is the concern of the tool hub, not the
/// authority.
///
/// Carries its own `mode` because the authority contract it enforces
/// depends on which side is supposed to validate (open question (a): we
/// resolved `legacy_dual` to mean the executor is the single deterministic
/// validator, never both sides).
pub struct DirectSkillExecutor {
    mode: AuthorityMode,
}

impl DirectSkillExecutor {
    /// Build an executor bound to the given authority mode.
    pub fn new(mode: AuthorityMode) -> Self {
        Self { mode }
    }
}

#[async_trait::async_trait]
impl SkillExecutor for DirectSkillExecutor {
    async fn create(
        &self,
        request: &SkillCreateRequest,
        decision: Option<&ControlDecision>,
        key: &str,
    ) -> Result<SkillRecord, SkillAuthorityError> {
        match self.mode {
            AuthorityMode::SkillServer => enforce_authority_contract(decision)?,
            AuthorityMode::LegacyDual => {
                let own_decision = validator::validate(&request.code, &request.language);
                if !own_decision.passed {
                    return Err(SkillAuthorityError::RejectedByAuthority {
                        reason: "rejected_by_authority",
                    });
                }
            }
        }

        let computed_key = skill_key(&request.name, &request.code, &request.language);
        debug_assert_eq!(&computed_key, key, "caller must pass the key it computed");

        Ok(SkillRecord {
            name: request.name.clone(),
            version: 1,
            status: SkillStatus::Active,
            key: computed_key,
        })
    }
}
