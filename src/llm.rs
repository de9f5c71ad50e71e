//! Model access.
//!
//! The pipeline only needs one operation from a model: turn a prompt into text.
//! [`LlmClient`] does that against an OpenAI-compatible chat completions endpoint;
//! [`CannedModel`] replays a saved reply.

use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You transform tabular data. Reply with a single JSON object and nothing else.";

#[async_trait]
pub trait PlanModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Reply used when no real API key is configured, so the whole pipeline can run offline.
    fn offline_reply(prompt: &str) -> String {
        let instruction = Regex::new(r"(?m)^Instruction:\s*(.+)$")
            .ok()
            .and_then(|re| re.captures(prompt))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let body = serde_json::json!({
            "description": format!("Offline mode, no transformation applied for: {}", instruction),
            "steps": []
        });
        format!("```json\n{}\n```", body)
    }

    async fn call_llm(&self, prompt: &str) -> Result<String, LlmError> {
        if self.config.is_offline() {
            debug!("Offline API key configured, skipping model call");
            return Ok(Self::offline_reply(prompt));
        }

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: JsonValue = response.json().await?;
        extract_content(&response_json)
    }
}

/// Pulls `choices[0].message.content` out of a chat completions response.
pub fn extract_content(response_json: &JsonValue) -> Result<String, LlmError> {
    if let Some(error) = response_json.get("error") {
        return Err(LlmError::Malformed(format!("API returned an error: {}", error)));
    }

    let choice = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::Malformed("no choices in response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("content_filter") => return Err(LlmError::ContentFiltered),
        Some("length") => warn!("LLM response was truncated due to length limit"),
        _ => {}
    }

    choice["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| LlmError::Malformed("no content in first choice".to_string()))
}

#[async_trait]
impl PlanModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.call_llm(prompt).await
    }
}

/// Always answers with the same text. Used to re-run a saved model reply.
#[derive(Debug, Clone)]
pub struct CannedModel {
    reply: String,
}

impl CannedModel {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: reply.into() }
    }
}

#[async_trait]
impl PlanModel for CannedModel {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok(self.reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_content() {
        let ok = json!({"choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]});
        assert_eq!(extract_content(&ok).unwrap(), "hi");

        let truncated = json!({"choices": [{"message": {"content": "{\"desc"}, "finish_reason": "length"}]});
        assert_eq!(extract_content(&truncated).unwrap(), "{\"desc");

        let filtered = json!({"choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]});
        assert!(matches!(extract_content(&filtered), Err(LlmError::ContentFiltered)));

        assert!(matches!(extract_content(&json!({"choices": []})), Err(LlmError::Malformed(_))));
        assert!(matches!(
            extract_content(&json!({"error": {"message": "bad key"}})),
            Err(LlmError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_client_echoes_instruction() {
        let client = LlmClient::new(LlmConfig::new(crate::config::OFFLINE_API_KEY)).unwrap();
        let reply = client
            .complete("Rows: 3\nInstruction: keep rows where a > 1\n")
            .await
            .unwrap();
        assert!(reply.starts_with("```json"));
        assert!(reply.contains("keep rows where a > 1"));
    }

    #[tokio::test]
    async fn test_canned_model() {
        let model = CannedModel::new("{\"description\": \"x\"}");
        assert_eq!(model.complete("anything").await.unwrap(), "{\"description\": \"x\"}");
    }
}
