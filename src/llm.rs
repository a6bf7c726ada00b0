//! Structured extraction over a chat-completion API.
//!
//! The pipeline treats the language model as an opaque capability: a system
//! prompt and a user message go in, JSON text comes out, and [`extract`]
//! parses it into a typed result. [`OpenAiClient`] speaks the OpenAI
//! `chat/completions` protocol, which most hosted and local model servers
//! also implement.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::http::{build_client, send_json_with_retry};
use crate::{Error, Result};

/// Prompted text in, model text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;

    /// Runs one completion and returns the raw message content.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Runs a completion and parses the reply as `T`.
pub async fn extract<T: DeserializeOwned>(llm: &dyn LlmClient, system: &str, user: &str) -> Result<T> {
    let raw = llm.complete(system, user).await?;
    let json = extract_json_from_response(&raw);
    serde_json::from_str(json).map_err(|e| {
        debug!(model = llm.model(), reply = %raw, "unparseable model reply");
        Error::external("llm", format!("unparseable structured output: {}", e))
    })
}

/// Extracts the JSON payload from a model reply.
///
/// Handles:
/// - ```` ```json ... ``` ```` fenced blocks
/// - bare ```` ``` ... ``` ```` fences
/// - raw JSON surrounded by prose (first `{` to last `}`)
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let body = start + "```json".len();
        if let Some(end) = trimmed[body..].find("```") {
            return trimmed[body..body + end].trim();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let body = start + 3;
        let json_start = trimmed[body..].find('{').map_or(body, |pos| body + pos);
        if let Some(end) = trimmed[json_start..].find("```") {
            return trimmed[json_start..json_start + end].trim();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

// ============ OpenAI-compatible client ============

pub struct OpenAiClient {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.openai.com/v1";

    pub fn new(model: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            model: strip_provider_prefix(model).to_string(),
            temperature: 0.0,
            max_retries: 3,
            client: build_client(timeout)?,
        })
    }

    pub fn from_config(config: &LlmConfig, timeout: Duration) -> anyhow::Result<Self> {
        let mut client = Self::new(&config.model, timeout)?
            .with_endpoint(&config.base_url)
            .with_temperature(config.temperature)
            .with_max_retries(config.max_retries);
        client.api_key = std::env::var(&config.api_key_env).ok();
        Ok(client)
    }

    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("LLM API key not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let url = format!("{}/chat/completions", self.endpoint);

        let json = send_json_with_retry("llm", self.max_retries, || {
            self.client.post(&url).bearer_auth(api_key).json(&body)
        })
        .await?;

        parse_chat_response(&json)
    }
}

/// `openai:gpt-4.1-mini` → `gpt-4.1-mini`.
fn strip_provider_prefix(model: &str) -> &str {
    model.strip_prefix("openai:").unwrap_or(model)
}

fn parse_chat_response(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::external("llm", "response has no message content"))
}
