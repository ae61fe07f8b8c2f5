//! HTTP embedding providers for the metrics engine.

use std::time::Duration;

use driftville_core::config::EmbeddingConfig;
use driftville_core::embedding::{BagOfWordsEmbedder, EmbeddingService};
use driftville_core::error::{DriftvilleError, Result};
use driftville_core::types::Embedding;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::LlmError;

/// Largest batch either provider accepts in one request.
pub const MAX_BATCH: usize = 100;

/// Which wire format to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingApi {
    /// `POST /api/embed` → `{"embeddings": [[..], ..]}`.
    Ollama,
    /// `POST /v1/embeddings` → `{"data": [{"embedding": [..]}, ..]}`.
    OpenAi {
        /// Bearer token.
        api_key: String,
    },
}

/// Batching HTTP embedding client.
pub struct EmbeddingClient {
    api: EmbeddingApi,
    base_url: String,
    model: String,
    batch_size: usize,
    http: Client,
}

impl EmbeddingClient {
    /// Create a client; `batch_size` is clamped to `1..=MAX_BATCH`.
    #[must_use]
    pub fn new(api: EmbeddingApi, base_url: impl Into<String>, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            api,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            batch_size: batch_size.clamp(1, MAX_BATCH),
            http: Client::new(),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> std::result::Result<Vec<Embedding>, LlmError> {
        let (url, bearer) = match &self.api {
            EmbeddingApi::Ollama => (format!("{}/api/embed", self.base_url), None),
            EmbeddingApi::OpenAi { api_key } => (format!("{}/v1/embeddings", self.base_url), Some(api_key)),
        };
        let mut req = self
            .http
            .post(&url)
            .json(&json!({ "model": self.model, "input": batch }))
            .timeout(Duration::from_secs(60));
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), resp.text().await.unwrap_or_default()));
        }
        let body: Value = resp.json().await?;
        match self.api {
            EmbeddingApi::Ollama => parse_ollama_embeddings(&body),
            EmbeddingApi::OpenAi { .. } => parse_openai_embeddings(&body),
        }
    }
}

fn vector(value: &Value) -> Option<Embedding> {
    #[allow(clippy::cast_possible_truncation)]
    let v: Option<Vec<f32>> = value.as_array()?.iter().map(|x| x.as_f64().map(|f| f as f32)).collect();
    v.map(Embedding)
}

/// Vectors from an Ollama `/api/embed` response.
///
/// # Errors
/// Returns `ParseError` on any shape mismatch.
pub fn parse_ollama_embeddings(body: &Value) -> std::result::Result<Vec<Embedding>, LlmError> {
    body["embeddings"]
        .as_array()
        .and_then(|rows| rows.iter().map(vector).collect())
        .ok_or_else(|| LlmError::ParseError("missing embeddings".into()))
}

/// Vectors from an OpenAI `/v1/embeddings` response.
///
/// # Errors
/// Returns `ParseError` on any shape mismatch.
pub fn parse_openai_embeddings(body: &Value) -> std::result::Result<Vec<Embedding>, LlmError> {
    body["data"]
        .as_array()
        .and_then(|rows| rows.iter().map(|r| vector(&r["embedding"])).collect())
        .ok_or_else(|| LlmError::ParseError("missing data[].embedding".into()))
}

impl EmbeddingService for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self
                .embed_batch(batch)
                .await
                .map_err(|e| DriftvilleError::Embedding(e.to_string()))?;
            if vectors.len() != batch.len() {
                return Err(DriftvilleError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            out.extend(vectors);
        }
        debug!(model = %self.model, texts = texts.len(), "Embedded");
        Ok(out)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// The embedder selected by configuration.
pub enum AnyEmbedder {
    /// Offline hashed bag-of-words.
    BagOfWords(BagOfWordsEmbedder),
    /// HTTP provider.
    Http(EmbeddingClient),
}

impl AnyEmbedder {
    /// Build from the `embedding` section. `api_key_env` names the
    /// variable holding the OpenAI key.
    ///
    /// # Errors
    /// Returns [`DriftvilleError::Config`] for an unknown provider or a
    /// missing key.
    pub fn from_config(config: &EmbeddingConfig, api_key_env: &str) -> Result<Self> {
        match config.provider.as_str() {
            "bag_of_words" => Ok(Self::BagOfWords(BagOfWordsEmbedder::new(config.dimensions))),
            "ollama" => Ok(Self::Http(EmbeddingClient::new(
                EmbeddingApi::Ollama,
                config.base_url.clone(),
                config.model.clone(),
                config.batch_size,
            ))),
            "openai" => {
                let api_key = std::env::var(api_key_env)
                    .map_err(|_| DriftvilleError::Config(format!("environment variable {api_key_env} is not set")))?;
                Ok(Self::Http(EmbeddingClient::new(
                    EmbeddingApi::OpenAi { api_key },
                    config.base_url.clone(),
                    config.model.clone(),
                    config.batch_size,
                )))
            }
            other => Err(DriftvilleError::Config(format!("unknown embedding provider '{other}'"))),
        }
    }
}

impl EmbeddingService for AnyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        match self {
            Self::BagOfWords(e) => e.embed(texts).await,
            Self::Http(e) => e.embed(texts).await,
        }
    }

    fn model_name(&self) -> &str {
        match self {
            Self::BagOfWords(e) => e.model_name(),
            Self::Http(e) => e.model_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_embedding_shapes() {
        let ollama = json!({"model": "m", "embeddings": [[0.5, 1.0], [0.0, -1.0]]});
        let vectors = parse_ollama_embeddings(&ollama).expect("ollama");
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[1], Embedding(vec![0.0, -1.0]));

        let openai = json!({"data": [{"index": 0, "embedding": [0.25]}]});
        assert_eq!(parse_openai_embeddings(&openai).expect("openai"), vec![Embedding(vec![0.25])]);
        assert!(parse_openai_embeddings(&json!({"data": [{"embedding": "nope"}]})).is_err());
    }

    #[test]
    fn batch_size_is_clamped() {
        let client = EmbeddingClient::new(EmbeddingApi::Ollama, "http://localhost:11434/", "m", 500);
        assert_eq!(client.batch_size, MAX_BATCH);
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn default_config_embeds_offline() {
        let embedder = AnyEmbedder::from_config(&EmbeddingConfig::default(), "UNUSED").expect("embedder");
        let out = embedder.embed(&["weekend trip".into()]).await.expect("embed");
        assert_eq!(out[0].0.len(), 256);
        let bad = EmbeddingConfig { provider: "magic".into(), ..EmbeddingConfig::default() };
        assert!(AnyEmbedder::from_config(&bad, "UNUSED").is_err());
    }
}
