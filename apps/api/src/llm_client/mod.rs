//! LLM client — the single point of entry for all model calls.
//!
//! ARCHITECTURAL RULE: no other module may talk to Ollama directly. The
//! pipeline sees only the `Generator` trait, so tests can script responses
//! without a live server.
//!
//! The client carries no retry or backoff policy of its own; the pipeline's
//! judge-feedback loop is the only retry mechanism in the system.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

const GENERATE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);
const LIST_MODELS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("generation response missing 'response' field")]
    MalformedResponse,
}

/// The generation capability the pipeline runs on. Failures are opaque to the
/// caller; the pipeline never interprets specific failure codes.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generates text from a prompt. `want_json` asks the model to constrain
    /// output to JSON; it does not guarantee the result parses.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        want_json: bool,
    ) -> Result<String, LlmError>;

    /// Lists the model identifiers the backend can serve, in backend order.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: Option<String>,
}

/// Client for a local Ollama server.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: String) -> Self {
        OllamaClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Generator for OllamaClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        want_json: bool,
    ) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature },
            format: want_json.then_some("json"),
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .post(&url)
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("generate call failed (model={model}): {e}");
                LlmError::Http(e)
            })?;
        let response = Self::check_status(response).await?;
        let data: GenerateResponse = response.json().await?;

        let text = data.response.ok_or(LlmError::MalformedResponse)?;
        debug!(
            "generate ok: model={model} prompt_chars={} temp={temperature:.2} json={want_json} duration_ms={}",
            prompt.len(),
            start.elapsed().as_millis()
        );
        Ok(text)
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(LIST_MODELS_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                error!("list models call failed: {e}");
                LlmError::Http(e)
            })?;
        let response = Self::check_status(response).await?;
        let data: TagsResponse = response.json().await?;

        let models: Vec<String> = data.models.into_iter().filter_map(|m| m.name).collect();
        debug!("list models ok: count={}", models.len());
        Ok(models)
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
/// Models routinely wrap JSON in fences even when asked not to.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_generate_request_serializes_format_only_when_json() {
        let with_json = GenerateRequest {
            model: "m1",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { temperature: 0.5 },
            format: Some("json"),
        };
        let value = serde_json::to_value(&with_json).unwrap();
        assert_eq!(value["format"], "json");
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["temperature"], 0.5);

        let without = GenerateRequest {
            model: "m1",
            prompt: "hi",
            stream: false,
            options: GenerateOptions { temperature: 0.5 },
            format: None,
        };
        let value = serde_json::to_value(&without).unwrap();
        assert!(value.get("format").is_none());
    }
}
