//! File-backed package allowlist with a TTL read cache.
//!
//! The allowlist is the package-policy half of the control authority: a
//! requested package that is not on it turns a create request into
//! `pending_package_approval`. Reads go through a 60s cache; the refresh is
//! single-flight — concurrent callers that hit an expired cache wait on the
//! one refresh instead of each re-reading the file.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::{PackageClassifier, SkillAuthorityError};

struct CachedSet {
    packages: HashSet<String>,
    fetched_at: Instant,
}

/// The authoritative package allowlist, stored as a JSON array of names.
pub struct PackageAllowlist {
    path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<CachedSet>>,
}

impl PackageAllowlist {
    /// Open the allowlist at `path` with the given cache TTL. The file is
    /// not read until the first lookup.
    pub fn open(path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            path: path.into(),
            ttl: Duration::from_secs(ttl_secs),
            cache: Mutex::new(None),
        }
    }

    /// Current allowlisted package names, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed;
    /// callers on the policy path treat that as an empty allowlist
    /// (fail-closed).
    pub async fn list(&self) -> Result<Vec<String>, SkillAuthorityError> {
        let set = self.cached_set().await?;
        let mut names: Vec<String> = set.into_iter().collect();
        names.sort();
        Ok(names)
    }

    /// Add a package to the allowlist and persist atomically. The cache is
    /// invalidated so the next lookup sees the addition immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written.
    pub async fn add(&self, package: &str) -> Result<(), SkillAuthorityError> {
        let mut set = read_allowlist(&self.path)?;
        set.insert(package.to_owned());

        let mut names: Vec<&String> = set.iter().collect();
        names.sort();
        let json = serde_json::to_string_pretty(&names)?;
        atomic_write(&self.path, json.as_bytes())?;

        *self.cache.lock().await = None;
        Ok(())
    }

    async fn cached_set(&self) -> Result<HashSet<String>, SkillAuthorityError> {
        let mut cache = self.cache.lock().await;
        // The lock is held across the refresh; concurrent expirations
        // queue behind the one re-read.
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.packages.clone());
            }
        }

        let packages = read_allowlist(&self.path)?;
        *cache = Some(CachedSet {
            packages: packages.clone(),
            fetched_at: Instant::now(),
        });
        Ok(packages)
    }
}

#[async_trait::async_trait]
impl PackageClassifier for PackageAllowlist {
    async fn non_allowlisted(
        &self,
        packages: &[String],
    ) -> Result<Vec<String>, SkillAuthorityError> {
        let allowed = self.cached_set().await?;
        Ok(packages
            .iter()
            .filter(|p| !allowed.contains(p.as_str()))
            .cloned()
            .collect())
    }
}

fn read_allowlist(path: &Path) -> Result<HashSet<String>, SkillAuthorityError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let names: Vec<String> = serde_json::from_str(&contents)?;
            Ok(names.into_iter().collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(SkillAuthorityError::Registry(e)),
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
