//! Domain-scoped HTTP client for tool-server calls.
//!
//! The hub routes invocations through this instead of a raw
//! `reqwest::Client`: a request may only leave the process toward a host
//! that is both on the allowlist and not a private or loopback address
//! (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16, 127.0.0.0/8, ::1). A
//! registered tool-server cannot be used to pivot into the local network.

use std::collections::HashSet;
use std::net::IpAddr;

use thiserror::Error;

/// Errors from a scoped HTTP call, policy violations included.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Request to a host outside the allowlist.
    #[error("domain not in allowlist: {0}")]
    DomainNotAllowed(String),
    /// Request to a private/loopback address.
    #[error("private IP address blocked: {0}")]
    PrivateIpBlocked(String),
    /// Underlying HTTP transport error.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// HTTP client that validates every URL against an allowlist and the
/// private-address block before sending.
pub struct ScopedHttpClient {
    inner: reqwest::Client,
    allowed_domains: HashSet<String>,
}

impl ScopedHttpClient {
    /// Build a client restricted to `allowed_domains`.
    pub fn new(allowed_domains: HashSet<String>) -> Self {
        Self {
            inner: reqwest::Client::new(),
            allowed_domains,
        }
    }

    /// GET `url` after policy validation.
    ///
    /// # Errors
    ///
    /// Returns a policy error for a blocked host, or a transport error.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, HttpError> {
        self.validate_url(url)?;
        self.inner.get(url).send().await.map_err(HttpError::from)
    }

    /// GET `url` with an `Authorization: Bearer` header.
    ///
    /// # Errors
    ///
    /// Returns a policy error for a blocked host, or a transport error.
    pub async fn get_with_bearer(
        &self,
        url: &str,
        token: &str,
    ) -> Result<reqwest::Response, HttpError> {
        self.validate_url(url)?;
        self.inner
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(HttpError::from)
    }

    /// POST a JSON body to `url` after policy validation.
    ///
    /// # Errors
    ///
    /// Returns a policy error for a blocked host, or a transport error.
    pub async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, HttpError> {
        self.validate_url(url)?;
        self.inner
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(HttpError::from)
    }

    /// POST a JSON body with an `Authorization: Bearer` header.
    ///
    /// # Errors
    ///
    /// Returns a policy error for a blocked host, or a transport error.
    pub async fn post_with_bearer(
        &self,
        url: &str,
        body: serde_json::Value,
        token: &str,
    ) -> Result<reqwest::Response, HttpError> {
        self.validate_url(url)?;
        self.inner
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(HttpError::from)
    }

    pub(crate) fn validate_url(&self, url: &str) -> Result<(), HttpError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;

        let host = parsed
            .host_str()
            .ok_or_else(|| HttpError::InvalidUrl("URL has no host".to_owned()))?;

        // Private addresses are blocked even when allowlisted.
        if is_private_address(host) {
            return Err(HttpError::PrivateIpBlocked(host.to_owned()));
        }

        if !self.allowed_domains.contains(host) {
            return Err(HttpError::DomainNotAllowed(host.to_owned()));
        }

        Ok(())
    }
}

/// Whether `host` is an IP literal in a private or loopback range. A
/// hostname returns `false`: the allowlist is the gate for names, and
/// resolution happens after validation.
fn is_private_address(host: &str) -> bool {
    let Ok(addr) = host.parse::<IpAddr>() else {
        return false;
    };
    match addr {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(domains: &[&str]) -> ScopedHttpClient {
        ScopedHttpClient::new(domains.iter().map(|d| (*d).to_owned()).collect())
    }

    #[test]
    fn allowlisted_domain_passes_validation() {
        let client = client_for(&["api.github.com"]);
        assert!(client.validate_url("https://api.github.com/repos").is_ok());
    }

    #[test]
    fn unlisted_domain_is_rejected() {
        let client = client_for(&["api.github.com"]);
        let result = client.validate_url("https://evil.com/steal");
        assert!(matches!(result, Err(HttpError::DomainNotAllowed(d)) if d == "evil.com"));
    }

    #[test]
    fn private_ranges_are_blocked_even_when_allowlisted() {
        for ip in ["10.0.0.1", "172.16.0.1", "192.168.1.1", "127.0.0.1"] {
            let client = client_for(&[ip]);
            let result = client.validate_url(&format!("http://{ip}/internal"));
            assert!(
                matches!(result, Err(HttpError::PrivateIpBlocked(ref blocked)) if blocked == ip),
                "{ip} should be blocked"
            );
        }
    }

    #[test]
    fn public_ip_literal_passes_when_allowlisted() {
        let client = client_for(&["8.8.8.8"]);
        assert!(client.validate_url("http://8.8.8.8/dns").is_ok());
    }

    #[test]
    fn empty_allowlist_blocks_everything() {
        let client = client_for(&[]);
        let result = client.validate_url("https://api.github.com/repos");
        assert!(matches!(result, Err(HttpError::DomainNotAllowed(_))));
    }

    #[test]
    fn unparsable_url_is_invalid() {
        let client = client_for(&[]);
        assert!(matches!(
            client.validate_url("not a url at all"),
            Err(HttpError::InvalidUrl(_))
        ));
    }

    #[test]
    fn hostnames_are_not_ip_checked() {
        assert!(!is_private_address("api.github.com"));
    }

    #[test]
    fn private_v4_boundaries() {
        assert!(!is_private_address("172.15.255.255"));
        assert!(is_private_address("172.16.0.0"));
        assert!(is_private_address("172.31.255.255"));
        assert!(!is_private_address("172.32.0.0"));
        assert!(!is_private_address("8.8.8.8"));
    }

    #[test]
    fn v6_loopback_is_blocked_and_public_v6_is_not() {
        assert!(is_private_address("::1"));
        assert!(!is_private_address("2001:db8::1"));
    }
}
