//! Health self-check and `health.json` file writing for the running daemon.
//!
//! Gathers a snapshot of component readiness and writes it atomically to
//! disk each tick, mirroring this codebase's other atomic-write idioms.

use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::AssistantConfig;
use crate::digest::lock;

/// Health report written to `state_dir/health.json` on a fixed interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall daemon status: `"running"`, `"degraded"`, or `"unhealthy"`.
    pub status: String,
    /// Seconds since process start.
    pub uptime_secs: u64,
    /// ISO 8601 timestamp of this report.
    pub generated_at: String,
    /// Whether the digest cycle is currently held by a (non-stale) lock.
    pub digest_lock_held: bool,
    /// Owner of the digest lock, if held.
    pub digest_lock_owner: Option<String>,
    /// Whether the digest worker is enabled in the loaded configuration.
    pub digest_enabled: bool,
    /// Number of active (non-revoked) skill records.
    pub active_skill_count: usize,
}

/// Gather a [`HealthReport`] from the running configuration and on-disk
/// state. Never fails: any component it cannot read degrades the status
/// rather than propagating an error, since a health check that can itself
/// fail defeats its purpose.
pub fn check_health(config: &AssistantConfig, start_time: Instant) -> HealthReport {
    let uptime_secs = start_time.elapsed().as_secs();
    let generated_at = chrono::Utc::now().to_rfc3339();

    let now = chrono::Utc::now();
    let lock_info = lock::lock_state(&config.paths.digest_lock_path());
    let digest_lock_held = lock_info.as_ref().is_some_and(|info| !info.is_stale(now));
    let digest_lock_owner = lock_info.map(|info| info.owner);

    let active_skill_count = match std::fs::read_to_string(config.paths.skill_registry_path()) {
        Ok(contents) => serde_json::from_str::<Vec<crate::skills::SkillRecord>>(&contents)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| !matches!(r.status, crate::skills::SkillStatus::Revoked))
                    .count()
            })
            .unwrap_or(0),
        Err(_) => 0,
    };

    let status = if config.digest.enable && !digest_lock_held {
        "running".to_owned()
    } else if config.digest.enable {
        "degraded".to_owned()
    } else {
        "running".to_owned()
    };

    HealthReport {
        status,
        uptime_secs,
        generated_at,
        digest_lock_held,
        digest_lock_owner,
        digest_enabled: config.digest.enable,
        active_skill_count,
    }
}

/// Write a health report to `path` atomically: write to a sibling `.tmp`
/// file, then rename over the target so readers never see a partial write.
///
/// # Errors
///
/// Returns an error if serialization or either file operation fails.
pub fn write_health_file(report: &HealthReport, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_config_reports_running_with_no_lock_held() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AssistantConfig::default();
        config.paths.state_dir = dir.path().to_str().unwrap().to_owned();
        config.digest.enable = true;

        let report = check_health(&config, Instant::now());
        assert_eq!(report.status, "running");
        assert!(!report.digest_lock_held);
        assert_eq!(report.active_skill_count, 0);
    }

    #[test]
    fn held_lock_marks_status_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AssistantConfig::default();
        config.paths.state_dir = dir.path().to_str().unwrap().to_owned();
        config.digest.enable = true;

        let _lock = crate::digest::lock::DigestLock::acquire(
            config.paths.digest_lock_path(),
            config.paths.digest_lock_takeover_path(),
            "owner-a",
            300,
            chrono::Utc::now(),
        )
        .unwrap();

        let report = check_health(&config, Instant::now());
        assert_eq!(report.status, "degraded");
        assert!(report.digest_lock_held);
        assert_eq!(report.digest_lock_owner.as_deref(), Some("owner-a"));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.json");
        let report = HealthReport {
            status: "running".to_owned(),
            uptime_secs: 42,
            generated_at: "2026-08-01T00:00:00Z".to_owned(),
            digest_lock_held: false,
            digest_lock_owner: None,
            digest_enabled: true,
            active_skill_count: 3,
        };
        write_health_file(&report, &path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let reloaded: HealthReport = serde_json::from_str(&contents).unwrap();
        assert_eq!(reloaded.active_skill_count, 3);
    }
}
