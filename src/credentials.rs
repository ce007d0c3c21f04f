//! Bearer-token loading for tool-server calls.
//!
//! Tokens live in a `.env`-style file under the state directory, keyed
//! `{TOOL_NAME}_API_KEY`. The file must be private (0600) before any value
//! from it is trusted, and neither [`Credentials`] nor
//! [`BearerCredential`] ever prints a value through `Debug`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Loaded credential key-value pairs.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// Load credentials from a `.env` file at `path`.
///
/// # Errors
///
/// Returns an error if the file is missing, readable by group/other, or
/// not parseable as `KEY=value` lines.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "credentials file does not exist: {}",
            path.display()
        ));
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;
    for item in iter {
        let (key, value) = item.with_context(|| {
            format!("failed to parse entry in credentials file {}", path.display())
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

/// A bearer token for one external tool API. Opaque beyond the token
/// itself; anything stateful (refresh, scopes) is the tool-server's
/// problem.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerCredential(String);

impl std::fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BearerCredential").field(&"[REDACTED]").finish()
    }
}

impl BearerCredential {
    /// The raw token, for the `Authorization` header.
    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Resolve the bearer token stored under `env_key`, treating a blank value
/// the same as an absent one.
pub fn resolve_bearer_credential(credentials: &Credentials, env_key: &str) -> Option<BearerCredential> {
    credentials
        .get(env_key)
        .filter(|v| !v.trim().is_empty())
        .map(|v| BearerCredential(v.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_key_resolves_to_none() {
        let creds = Credentials::from_map(BTreeMap::new());
        assert!(resolve_bearer_credential(&creds, "SEARCH_API_KEY").is_none());
    }

    #[test]
    fn blank_env_value_resolves_to_none() {
        let mut map = BTreeMap::new();
        map.insert("SEARCH_API_KEY".to_owned(), "   ".to_owned());
        let creds = Credentials::from_map(map);
        assert!(resolve_bearer_credential(&creds, "SEARCH_API_KEY").is_none());
    }

    #[test]
    fn present_env_key_resolves_to_token() {
        let mut map = BTreeMap::new();
        map.insert("SEARCH_API_KEY".to_owned(), "secret-token".to_owned());
        let creds = Credentials::from_map(map);
        let resolved = resolve_bearer_credential(&creds, "SEARCH_API_KEY").unwrap();
        assert_eq!(resolved.token(), "secret-token");
        assert_eq!(format!("{resolved:?}"), "BearerCredential(\"[REDACTED]\")");
    }

    #[cfg(unix)]
    #[test]
    fn world_readable_credentials_file_is_refused() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "SEARCH_API_KEY=tok\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert!(load_credentials(&path).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let creds = load_credentials(&path).unwrap();
        assert_eq!(creds.get("SEARCH_API_KEY"), Some("tok"));
    }
}
