//! Authoritative truth store for skill records (`installed.json`).
//!
//! Writes are atomic: write to a sibling temp file, `fsync`, then rename
//! over the target. Readers never observe a partial write; at worst they
//! read the previous complete version during a concurrent rename.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{SkillAuthorityError, SkillRecord, SkillStatus};

/// In-memory + on-disk truth store, keyed by [`SkillRecord::key`].
///
/// Invariant: only one non-revoked record exists per key. `upsert`
/// enforces this by replacing (never appending to) the entry for a key.
pub struct SkillRegistry {
    path: PathBuf,
    records: RwLock<HashMap<String, SkillRecord>>,
}

impl SkillRegistry {
    /// Load the registry from `path`, creating an empty one if the file
    /// does not yet exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SkillAuthorityError> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let list: Vec<SkillRecord> = serde_json::from_str(&contents)?;
                list.into_iter().map(|r| (r.key.clone(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(SkillAuthorityError::Registry(e)),
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Insert or replace the record for its key, then atomically persist.
    ///
    /// # Errors
    ///
    /// Returns an error if the atomic write fails.
    pub fn upsert(&self, record: SkillRecord) -> Result<(), SkillAuthorityError> {
        {
            let mut records = self.records.write().expect("registry lock poisoned");
            if let Some(existing) = records.get(&record.key) {
                let mut bumped = record;
                bumped.version = existing.version.saturating_add(1);
                records.insert(bumped.key.clone(), bumped);
            } else {
                records.insert(record.key.clone(), record);
            }
        }
        self.persist()
    }

    /// Mark a record revoked without removing it from the file (history is
    /// kept; `get_active` filters it out).
    ///
    /// # Errors
    ///
    /// Returns an error if the atomic write fails, or if no record exists
    /// for `key`.
    pub fn revoke(&self, key: &str) -> Result<(), SkillAuthorityError> {
        {
            let mut records = self.records.write().expect("registry lock poisoned");
            if let Some(record) = records.get_mut(key) {
                record.status = SkillStatus::Revoked;
            }
        }
        self.persist()
    }

    /// Return all non-revoked records.
    pub fn active_records(&self) -> Vec<SkillRecord> {
        self.records
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter(|r| !matches!(r.status, SkillStatus::Revoked))
            .cloned()
            .collect()
    }

    /// Look up a record by key.
    pub fn get(&self, key: &str) -> Option<SkillRecord> {
        self.records.read().expect("registry lock poisoned").get(key).cloned()
    }

    fn persist(&self) -> Result<(), SkillAuthorityError> {
        let records = self.records.read().expect("registry lock poisoned");
        let list: Vec<&SkillRecord> = records.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        atomic_write(&self.path, json.as_bytes())?;
        Ok(())
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        tmp.write_all(contents)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
