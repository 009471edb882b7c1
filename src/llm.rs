//! LLM provider
//!
//! Chat-completions client behind [`LlmProvider`] so the pipeline and the
//! benchmark can run against any model, or a scripted fake in tests.

use crate::error::{PilotError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").unwrap();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1000,
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str, params: &GenerationParams) -> Result<String>;
}

pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PilotError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            client,
        })
    }

    /// `OPENAI_API_KEY`, with optional `OPENAI_BASE_URL` and `OPENAI_MODEL`
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PilotError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let mut provider = Self::new(api_key, timeout)?;
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            provider = provider.with_base_url(url);
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            provider = provider.with_model(model);
        }
        Ok(provider)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

fn request_error(e: reqwest::Error) -> PilotError {
    if e.is_timeout() {
        PilotError::ProviderTimeout(e.to_string())
    } else {
        PilotError::Llm(format!("LLM API call failed: {}", e))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt}
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens
        });

        debug!("Calling {} ({} prompt chars)", self.model, prompt.len());
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::GATEWAY_TIMEOUT || status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(PilotError::ProviderTimeout(format!("provider returned {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("LLM API returned {}: {}", status, text);
            return Err(PilotError::Llm(format!("LLM API returned {}: {}", status, text)));
        }

        let response_json: serde_json::Value = response.json().await.map_err(request_error)?;
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PilotError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

/// Pull the body out of a fenced block if the model wrapped its answer in one
pub fn strip_code_fences(text: &str) -> String {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(strip_code_fences("Here:\n```\nSELECT 2\n```\nthanks"), "SELECT 2");
        assert_eq!(strip_code_fences("  SELECT 3  "), "SELECT 3");
    }

    #[test]
    fn test_builder_trims_base_url() {
        let provider = OpenAiProvider::new("key".into(), Duration::from_secs(1))
            .unwrap()
            .with_base_url("http://localhost:8080/v1/")
            .with_model("local");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.name(), "local");
    }
}
