//! File-based advisory lock for the digest pipeline.
//!
//! Acquisition is `O_CREAT|O_EXCL` on the lock file. A stale lock (held
//! past its timeout) is reclaimed only via an exclusive create of a
//! sidecar `.takeover` sentinel, which serializes concurrent takeover
//! attempts so at most one racer wins.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contents of the digest lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Opaque owner identifier (hostname:pid, typically).
    pub owner: String,
    /// Process id of the holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Seconds after which the lock is eligible for takeover.
    pub timeout_s: u64,
}

impl LockInfo {
    /// Whether this lock is stale as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.acquired_at).to_std() {
            Ok(elapsed) => elapsed.as_secs() >= self.timeout_s,
            Err(_) => false,
        }
    }
}

/// Errors from lock acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The lock is currently held by a non-stale owner.
    #[error("lock held by {owner} since {acquired_at}")]
    Held {
        /// Current holder.
        owner: String,
        /// When they acquired it.
        acquired_at: DateTime<Utc>,
    },
    /// Another process is already attempting a takeover.
    #[error("takeover already in progress")]
    TakeoverInProgress,
    /// Underlying I/O failure.
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The lock file held malformed JSON.
    #[error("lock file corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// An acquired digest lock. Dropping this does not release the lock —
/// callers must call [`DigestLock::release`] explicitly so release is
/// visible in the calling code, matching the "cycle under a single held
/// lock" contract.
pub struct DigestLock {
    lock_path: PathBuf,
    takeover_path: PathBuf,
}

impl DigestLock {
    /// Attempt to acquire the lock at `lock_path`, using `takeover_path` as
    /// the sidecar sentinel for stale-lock reclaim.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Held`] if a non-stale lock exists, or
    /// [`LockError::TakeoverInProgress`] if another process is racing to
    /// reclaim a stale one.
    pub fn acquire(
        lock_path: impl Into<PathBuf>,
        takeover_path: impl Into<PathBuf>,
        owner: &str,
        timeout_s: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, LockError> {
        let lock_path = lock_path.into();
        let takeover_path = takeover_path.into();

        match try_create_exclusive(&lock_path) {
            Ok(()) => {
                write_lock_info(&lock_path, owner, timeout_s, now)?;
                return Ok(Self {
                    lock_path,
                    takeover_path,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let existing = read_lock_info(&lock_path)?;
        if !existing.is_stale(now) {
            return Err(LockError::Held {
                owner: existing.owner,
                acquired_at: existing.acquired_at,
            });
        }

        // Stale: serialize takeover via an exclusive sentinel create.
        match try_create_exclusive(&takeover_path) {
            Ok(()) => {
                write_lock_info(&lock_path, owner, timeout_s, now)?;
                let _ = std::fs::remove_file(&takeover_path);
                Ok(Self {
                    lock_path,
                    takeover_path,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LockError::TakeoverInProgress)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock by removing the lock file.
    pub fn release(self) {
        let _ = std::fs::remove_file(&self.lock_path);
        let _ = std::fs::remove_file(&self.takeover_path);
    }
}

/// Read the lock file's contents without attempting to acquire it, for
/// health reporting. Returns `None` if no lock is currently held or the
/// file cannot be parsed.
pub fn lock_state(lock_path: &Path) -> Option<LockInfo> {
    read_lock_info(lock_path).ok()
}

fn try_create_exclusive(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().write(true).create_new(true).open(path)?;
    Ok(())
}

fn write_lock_info(
    path: &Path,
    owner: &str,
    timeout_s: u64,
    now: DateTime<Utc>,
) -> Result<(), LockError> {
    let info = LockInfo {
        owner: owner.to_owned(),
        pid: std::process::id(),
        acquired_at: now,
        timeout_s,
    };
    let json = serde_json::to_string(&info)?;
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn read_lock_info(path: &Path) -> Result<LockInfo, LockError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
