//! Trait boundary for the LLM inference layer. The model family, hosting,
//! and routing policy behind this trait are out of scope for this crate;
//! every pipeline stage talks to inference only through
//! [`InferenceProvider::generate`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors from a single inference call.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// The call failed (timeout, transport error, non-2xx response).
    #[error("inference request failed: {0}")]
    RequestFailed(String),
    /// The call did not finish within the per-stage timeout.
    #[error("inference timed out after {0}s")]
    Timeout(u64),
}

/// A single LLM completion call, model-agnostic.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Generate a completion for `prompt` using `model`, capped at
    /// `max_tokens`.
    async fn generate(&self, model: &str, prompt: &str, max_tokens: u32) -> Result<String, InferenceError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Talks to a local Ollama-compatible `/api/generate` endpoint. One
/// instance is shared by every pipeline stage; the per-stage timeout is
/// fixed at construction.
pub struct HttpInferenceProvider {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl HttpInferenceProvider {
    /// Build a provider against `base_url` with a per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl InferenceProvider for HttpInferenceProvider {
    async fn generate(&self, model: &str, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_tokens,
                temperature: 0.0,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.timeout_secs)
                } else {
                    InferenceError::RequestFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(InferenceError::RequestFailed(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::RequestFailed(e.to_string()))?;
        Ok(parsed.response)
    }
}

/// A scripted provider for tests: returns each entry in `responses` in
/// order, repeating the last one once exhausted.
pub struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Build a provider that replays `responses` in order.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn generate(&self, _model: &str, _prompt: &str, _max_tokens: u32) -> Result<String, InferenceError> {
        let mut responses = self.responses.lock().expect("scripted provider lock poisoned");
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses.first().cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_provider_replays_in_order_then_repeats_last() {
        let provider = ScriptedProvider::new(vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(provider.generate("m", "p", 10).await.unwrap(), "a");
        assert_eq!(provider.generate("m", "p", 10).await.unwrap(), "b");
        assert_eq!(provider.generate("m", "p", 10).await.unwrap(), "b");
    }
}
