//! Safety pattern checker: a fast keyword/import blocklist pre-filter run
//! before a skill is created, producing the [`ControlDecision`] the
//! authority (or, in `legacy_dual` mode, the executor) acts on.

use crate::types::{ControlAction, ControlDecision};

use super::AUTHORITY_SOURCE;

/// Version tag stamped on decisions this validator produces.
pub const POLICY_VERSION: &str = "skill-validator-v1";

/// Substrings that always block skill creation outright.
const BLOCKED_PATTERNS: &[&str] = &[
    "os.system(",
    "subprocess.Popen(",
    "eval(",
    "exec(",
    "rm -rf /",
    "__import__(\"os\")",
];

/// Substrings that are suspicious enough to require manual approval but not
/// to block outright.
const ESCALATE_PATTERNS: &[&str] = &["socket.", "ctypes.", "base64.b64decode("];

/// Run the safety validator over a skill's source.
///
/// Deterministic: the same `(code, language)` always yields the same
/// decision.
pub fn validate(code: &str, language: &str) -> ControlDecision {
    let mut reasons = Vec::new();

    for pattern in BLOCKED_PATTERNS {
        if code.contains(pattern) {
            reasons.push(format!("blocked pattern: {pattern}"));
        }
    }
    if !reasons.is_empty() {
        return ControlDecision {
            action: ControlAction::Block,
            passed: false,
            source: AUTHORITY_SOURCE.to_owned(),
            policy_version: POLICY_VERSION.to_owned(),
            reasons,
        };
    }

    for pattern in ESCALATE_PATTERNS {
        if code.contains(pattern) {
            reasons.push(format!("requires review: {pattern}"));
        }
    }
    if !reasons.is_empty() {
        return ControlDecision {
            action: ControlAction::Escalate,
            passed: false,
            source: AUTHORITY_SOURCE.to_owned(),
            policy_version: POLICY_VERSION.to_owned(),
            reasons,
        };
    }

    if language.trim().is_empty() {
        return ControlDecision {
            action: ControlAction::Block,
            passed: false,
            source: AUTHORITY_SOURCE.to_owned(),
            policy_version: POLICY_VERSION.to_owned(),
            reasons: vec!["language tag is required".to_owned()],
        };
    }

    ControlDecision {
        action: ControlAction::Approve,
        passed: true,
        source: AUTHORITY_SOURCE.to_owned(),
        policy_version: POLICY_VERSION.to_owned(),
        reasons: Vec::new(),
    }
}
