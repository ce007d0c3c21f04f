//! Embedding generation seam for vector search.
//!
//! The memory engine only ever sees the [`Embedder`] trait; which target
//! actually serves the vectors is decided once at startup by the embedding
//! router. [`OllamaEmbedder`] is the concrete implementation for the local
//! Ollama-compatible `/api/embed` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const EMBED_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text` into a vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or answers with
    /// something that is not an embedding.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Dimensionality of the vectors this embedder produces.
    fn dimensions(&self) -> usize;
}

/// Errors from embedding generation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// HTTP transport failure.
    #[error("embedder request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not match the expected format.
    #[error("embedder response parse error: {0}")]
    Parse(String),

    /// Provider answered, but not successfully.
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedder backed by a local `/api/embed` endpoint.
pub struct OllamaEmbedder {
    model: String,
    base_url: String,
    dims: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("dims", &self.dims)
            .finish()
    }
}

impl OllamaEmbedder {
    /// Build an embedder for `model` served at `base_url`. `dims` is the
    /// model's vector dimensionality (e.g. 768 for nomic-embed-text),
    /// declared up front so storage can be pre-allocated.
    pub fn new(model: &str, base_url: &str, dims: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            model: model.to_owned(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            dims,
            client,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = EmbedRequest {
            model: &self.model,
            input: text,
        };

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Unavailable(format!(
                "embedding endpoint returned {status}: {body_text}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Parse(e.to_string()))?;

        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedderError::Parse("empty embeddings array".to_owned()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_response_takes_the_first_vector() {
        let parsed: EmbedResponse =
            serde_json::from_str(r#"{"embeddings": [[0.1, 0.2], [0.9, 0.9]]}"#).expect("parse");
        assert_eq!(parsed.embeddings[0], vec![0.1, 0.2]);
    }

    #[test]
    fn debug_output_omits_nothing_sensitive_but_stays_compact() {
        let embedder = OllamaEmbedder::new("nomic-embed-text", "http://127.0.0.1:11434/", 768);
        let rendered = format!("{embedder:?}");
        assert!(rendered.contains("nomic-embed-text"));
        assert!(rendered.contains("768"));
        // Trailing slash on the base URL is normalized away.
        assert!(!rendered.contains("11434/"));
    }
}
