//! Tool registry and hub: a catalog of callable tools backed by
//! external tool-servers, and a hub that routes one invocation to the
//! server that owns it.
//!
//! The catalog is loaded from JSON schema files on disk with hot-reload
//! ([`registry::ToolRegistry`]) so a tool-server's capabilities can
//! change without restarting the process. Invocation goes out over an
//! SSRF-safe, domain-scoped HTTP client ([`scoped_http::ScopedHttpClient`])
//! and is rate-limited per tool name ([`rate_limit::RateLimiter`]) to keep
//! a runaway tool loop from hammering a single server.

pub mod rate_limit;
pub mod registry;
pub mod scoped_http;

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::credentials::{resolve_bearer_credential, Credentials};
use crate::pipeline::output::ToolHub;

use rate_limit::RateLimiter;
use registry::ToolRegistry;
use scoped_http::ScopedHttpClient;

/// Default tool-invocation rate limit: 30 calls per tool per minute.
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMIT_MAX_CALLS: u32 = 30;

/// Errors surfaced while routing a tool invocation to its server.
#[derive(Debug, Error)]
pub enum ToolHubError {
    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// The tool's per-name rate limit has been exceeded.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// The outbound HTTP call to the tool-server failed or was policy-blocked.
    #[error("tool-server request failed: {0}")]
    Http(#[from] scoped_http::HttpError),
}

/// Routes tool invocations to external tool-servers over HTTP, honoring
/// the domain allowlist, per-tool rate limits, and optional bearer auth.
pub struct HttpToolHub {
    registry: std::sync::Arc<ToolRegistry>,
    client: ScopedHttpClient,
    limiter: RateLimiter,
    credentials: Credentials,
}

impl HttpToolHub {
    /// Build a hub over `registry`, restricting outbound calls to
    /// `allowed_domains` and resolving per-tool bearer tokens (keyed
    /// `{TOOL_NAME}_API_KEY`, uppercased) from `credentials`.
    pub fn new(
        registry: std::sync::Arc<ToolRegistry>,
        allowed_domains: HashSet<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            registry,
            client: ScopedHttpClient::new(allowed_domains),
            limiter: RateLimiter::new(RATE_LIMIT_WINDOW, RATE_LIMIT_MAX_CALLS),
            credentials,
        }
    }

    fn env_key_for(tool_name: &str) -> String {
        format!("{}_API_KEY", tool_name.to_ascii_uppercase())
    }

    /// Invoke a tool and surface the structured error, rather than the
    /// string-erased one the [`ToolHub`] trait requires.
    async fn invoke_checked(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, ToolHubError> {
        let schema = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolHubError::UnknownTool(tool_name.to_owned()))?;

        if !self.limiter.allow(tool_name) {
            return Err(ToolHubError::RateLimited(tool_name.to_owned()));
        }

        let bearer = resolve_bearer_credential(&self.credentials, &Self::env_key_for(tool_name));

        let response = match bearer {
            Some(token) => self.client.post_with_bearer(&schema.endpoint, args, token.token()).await?,
            None => self.client.post(&schema.endpoint, args).await?,
        };

        let body = response.text().await.map_err(scoped_http::HttpError::from)?;
        Ok(body)
    }
}

#[async_trait]
impl ToolHub for HttpToolHub {
    async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> Result<String, String> {
        self.invoke_checked(tool_name, args).await.map_err(|e| {
            warn!(tool = tool_name, error = %e, "tool invocation failed");
            e.to_string()
        })
    }
}
