//! Completion and embedding client contracts plus the OpenAI-compatible
//! implementation.
//!
//! Clients are injected handles owned by the caller — there is no process
//! singleton. Completion retries are bounded and cover only malformed JSON
//! responses, never transport failures; embedding calls are atomic for the
//! whole batch.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use docforge_shared::{DocforgeError, Result};

/// A parsed JSON completion with the model that produced it.
#[derive(Debug, Clone)]
pub struct JsonCompletion {
    pub payload: Map<String, Value>,
    pub model: String,
}

/// Synchronous-contract completion service returning JSON objects.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Request a completion and parse it as a JSON object. Retries up to
    /// `retries` additional times when the response is not a parseable JSON
    /// object; fails when no attempt yields one.
    async fn complete_json(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
        retries: u32,
    ) -> Result<JsonCompletion>;
}

/// Batch embedding service. A transport or service error fails the whole
/// batch atomically.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String], model: &str) -> Result<(Vec<Vec<f32>>, String)>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible implementation
// ---------------------------------------------------------------------------

/// Client for an OpenAI-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client against `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("docforge/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| DocforgeError::config(format!("http client build: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    model: String,
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Strip a surrounding markdown code fence, if present.
fn strip_fence(text: &str) -> &str {
    let cleaned = text.trim();
    let Some(rest) = cleaned.strip_prefix("```") else {
        return cleaned;
    };
    // Drop the fence line (may carry a language hint), then the closing fence.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse model output into a JSON object, tolerating fenced output.
fn parse_json_object(text: &str) -> std::result::Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(strip_fence(text)) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("JSON root must be an object, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete_json(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
        retries: u32,
    ) -> Result<JsonCompletion> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": model,
            "temperature": temperature,
            "max_tokens": max_tokens,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let mut last_error = String::new();
        for attempt in 0..=retries {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| DocforgeError::AiResponse(format!("completion request: {e}")))?
                .error_for_status()
                .map_err(|e| DocforgeError::AiResponse(format!("completion status: {e}")))?;

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| DocforgeError::AiResponse(format!("completion body: {e}")))?;

            let content = parsed
                .choices
                .first()
                .and_then(|c| c.message.content.as_deref())
                .unwrap_or("{}");

            match parse_json_object(content) {
                Ok(payload) => {
                    debug!(model = %parsed.model, attempt, "completion parsed");
                    return Ok(JsonCompletion {
                        payload,
                        model: parsed.model,
                    });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "completion was not a JSON object");
                    last_error = e;
                }
            }
        }

        Err(DocforgeError::AiResponse(format!(
            "model did not return valid JSON: {last_error}"
        )))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiClient {
    async fn embed(&self, texts: &[String], model: &str) -> Result<(Vec<Vec<f32>>, String)> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": texts });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocforgeError::Embedding(format!("embedding request: {e}")))?
            .error_for_status()
            .map_err(|e| DocforgeError::Embedding(format!("embedding status: {e}")))?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| DocforgeError::Embedding(format!("embedding body: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(DocforgeError::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let vectors = parsed.data.into_iter().map(|d| d.embedding).collect();
        Ok((vectors, parsed.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn json_object_parsing() {
        let map = parse_json_object("{\"values\": {}}").expect("object");
        assert!(map.contains_key("values"));

        assert!(parse_json_object("[1, 2]").is_err());
        assert!(parse_json_object("not json").is_err());
        assert!(parse_json_object("```json\n{\"k\": 3}\n```").is_ok());
    }
}
