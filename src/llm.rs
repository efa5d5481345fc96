//! OpenAI-compatible chat completion client.
//!
//! Works with any endpoint that speaks `POST {base_url}/chat/completions`
//! (OpenAI, Azure-style gateways, vLLM, Ollama's `/v1`, self-hosted
//! proxies). The API key is read from the configured environment variable
//! on every request; when the variable is unset no `Authorization` header
//! is sent, which local servers accept.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use askdocs_core::llm::{ChatMessage, LanguageModel};
use askdocs_core::HarnessError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::LlmConfig;

pub struct OpenAiCompatibleChat {
    model: String,
    base_url: String,
    api_key_env: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatibleChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            temperature: config.temperature,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        })
    }
}

/// Extract `choices[0].message.content`.
fn parse_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid chat completion response: missing choices[0].message.content"))
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = self.endpoint();
        let mut request = self.client.post(&url).json(&self.request_body(messages));
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.is_empty() => request = request.bearer_auth(key),
            _ => debug!(var = %self.api_key_env, "no API key set; sending unauthenticated request"),
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("chat completion request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                bail!(HarnessError::model_resolution(&self.model, body_text));
            }
            bail!("Chat completion API error {}: {}", status, body_text);
        }
        let json: Value = response.json().await?;
        parse_completion(&json)
    }
}
