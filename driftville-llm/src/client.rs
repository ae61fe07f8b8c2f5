//! HTTP generation backends (Ollama and OpenAI-compatible) behind [`GenerationService`].
//!
//! Every call is a single attempt. Non-success statuses are mapped onto
//! [`LlmError`] so the retry layer can tell quota trouble from a bad request.

use std::time::{Duration, Instant};

use driftville_core::config::LlmConfig;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{GenerationService, LlmRequest, LlmResponse};

/// Provider backend for generation.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama chat endpoint.
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible chat completions.
    OpenAiCompatible {
        /// Server root, without `/v1`.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No backend; every call fails as unavailable.
    None,
}

impl LlmProvider {
    /// Build from the `llm` config section, reading the API key from the
    /// configured environment variable.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unknown provider or a missing key.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        match config.provider.as_str() {
            "ollama" => Ok(Self::Ollama { base_url }),
            "openai" | "openai_compatible" => {
                let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                    LlmError::ConfigError(format!("environment variable {} is not set", config.api_key_env))
                })?;
                Ok(Self::OpenAiCompatible { base_url, api_key })
            }
            "none" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown provider '{other}'"))),
        }
    }
}

/// HTTP client routing requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
}

impl LlmClient {
    /// Create a new client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
        }
    }

    /// Create a client from the `llm` config section.
    ///
    /// # Errors
    /// See [`LlmProvider::from_config`].
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self::new(LlmProvider::from_config(config)?, config.model.clone()))
    }

    /// Create a client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new())
    }

    /// Whether a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, url: &str, bearer: Option<&str>, body: &Value, timeout_ms: u64) -> Result<(Value, u64), LlmError> {
        let start = Instant::now();
        let mut req = self.http.post(url).json(body).timeout(Duration::from_millis(timeout_ms));
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| match LlmError::from(e) {
            LlmError::Timeout(_) => LlmError::Timeout(timeout_ms),
            other => other,
        })?;
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = start.elapsed().as_millis() as u64;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = LlmError::from_status(status.as_u16(), body);
            warn!(url, status = status.as_u16(), transient = err.is_transient(), "Provider returned error");
            return Err(err);
        }
        let json: Value = resp.json().await.map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok((json, latency_ms))
    }
}

/// Text of an Ollama `/api/chat` response.
///
/// # Errors
/// Returns `ParseError` if `message.content` is missing.
pub fn parse_ollama_chat(json: &Value) -> Result<(String, u32), LlmError> {
    let text = json["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError("missing message.content".into()))?;
    let tokens = u32::try_from(json["eval_count"].as_u64().unwrap_or(0)).unwrap_or(u32::MAX);
    Ok((text.to_string(), tokens))
}

/// Text of an OpenAI-compatible chat completion.
///
/// # Errors
/// Returns `ParseError` if `choices[0].message.content` is missing.
pub fn parse_openai_chat(json: &Value) -> Result<(String, u32), LlmError> {
    let text = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError("missing choices[0].message.content".into()))?;
    let tokens = u32::try_from(json["usage"]["completion_tokens"].as_u64().unwrap_or(0)).unwrap_or(u32::MAX);
    Ok((text.to_string(), tokens))
}

/// Ollama's `done` flag; replies without one are complete.
fn completion_done(json: &Value) -> bool {
    json.get("done").and_then(Value::as_bool).unwrap_or(true)
}

fn messages(request: &LlmRequest) -> Value {
    let mut msgs = Vec::with_capacity(2);
    if !request.system.is_empty() {
        msgs.push(json!({ "role": "system", "content": request.system }));
    }
    msgs.push(json!({ "role": "user", "content": request.user }));
    Value::Array(msgs)
}

impl GenerationService for LlmClient {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let (json, latency_ms, (text, tokens_generated)) = match &self.provider {
            LlmProvider::None => return Err(LlmError::Unavailable("no LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let body = json!({
                    "model": self.model,
                    "messages": messages(request),
                    "stream": false,
                    "options": {
                        "temperature": request.temperature,
                        "num_predict": request.max_tokens,
                    }
                });
                let (json, latency) = self.post(&format!("{base_url}/api/chat"), None, &body, request.timeout_ms).await?;
                let parsed = parse_ollama_chat(&json)?;
                (json, latency, parsed)
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let body = json!({
                    "model": self.model,
                    "messages": messages(request),
                    "max_tokens": request.max_tokens,
                    "temperature": request.temperature,
                });
                let (json, latency) = self
                    .post(&format!("{base_url}/v1/chat/completions"), Some(api_key), &body, request.timeout_ms)
                    .await?;
                let parsed = parse_openai_chat(&json)?;
                (json, latency, parsed)
            }
        };
        let done = completion_done(&json);
        debug!(
            model = %self.model,
            latency_ms,
            tokens = tokens_generated,
            done,
            "Generation complete"
        );
        Ok(LlmResponse {
            text,
            tokens_generated,
            latency_ms,
            model: self.model.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_response_shapes() {
        let ollama = json!({"message": {"role": "assistant", "content": "hi"}, "eval_count": 3});
        assert_eq!(parse_ollama_chat(&ollama).expect("ollama"), ("hi".to_string(), 3));
        let openai = json!({"choices": [{"message": {"content": "yo"}}], "usage": {"completion_tokens": 2}});
        assert_eq!(parse_openai_chat(&openai).expect("openai"), ("yo".to_string(), 2));
        assert!(parse_openai_chat(&json!({"choices": []})).is_err());
    }

    #[test]
    fn done_flag_defaults_to_complete() {
        assert!(completion_done(&json!({"message": {"content": "hi"}})));
        assert!(completion_done(&json!({"done": true})));
        assert!(!completion_done(&json!({"done": false})));
        assert!(completion_done(&json!({"done": "maybe"})));
    }

    #[test]
    fn empty_system_is_omitted() {
        let msgs = messages(&LlmRequest::new("", "hello"));
        assert_eq!(msgs.as_array().map(Vec::len), Some(1));
        let msgs = messages(&LlmRequest::new("be brief", "hello"));
        assert_eq!(msgs[0]["role"], "system");
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let config = LlmConfig { provider: "carrier-pigeon".into(), ..LlmConfig::default() };
        assert!(matches!(LlmProvider::from_config(&config), Err(LlmError::ConfigError(_))));
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client.generate(&LlmRequest::new("s", "u")).await.expect_err("unavailable");
        assert!(err.is_transient());
    }
}
