//! LLM client: `complete(messages) -> text` against an OpenAI-compatible
//! chat-completions endpoint, with retry/backoff.
//!
//! Grounded on the teacher's `agent/llm.rs::OpenRouterClient` (request shape,
//! Bearer auth, tolerant string-or-array content parsing) and
//! `original_source/app/services/together_client.py::call_llm` for the retry
//! policy: 3 attempts total, exponential backoff starting at 1s, retryable
//! only on DNS/network/timeout errors.

use crate::config::LlmConfig;
use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, api_key: String, config: &LlmConfig) -> Self {
        Self {
            http,
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_s),
        }
    }

    /// `messages = [system] + history + [current user]` per §4.7 step 3.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let mut attempt = 0u32;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            attempt += 1;
            match self.complete_once(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!("LLM call attempt {attempt} failed ({e}), retrying in {backoff:?}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn complete_once(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest { model: &self.model, messages, max_tokens: None };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::TransientNetwork(format!("LLM HTTP {status}: {body}")));
        }

        let value: Value = response.json().await.map_err(classify_reqwest_error)?;
        extract_content(&value).ok_or_else(|| {
            AgentError::ModelUnavailable("LLM response missing choices[0].message.content".into())
        })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() || e.is_connect() {
        AgentError::TransientNetwork(e.to_string())
    } else {
        AgentError::ModelUnavailable(e.to_string())
    }
}

/// `choices[0].message.content` may be a plain string or an array of
/// `{type, text}` parts; tolerate both, matching the teacher's parsing.
fn extract_content(value: &Value) -> Option<String> {
    let content = value.get("choices")?.get(0)?.get("message")?.get("content")?;
    if let Some(s) = content.as_str() {
        return Some(s.to_string());
    }
    if let Some(parts) = content.as_array() {
        let joined = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if !joined.is_empty() {
            return Some(joined);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plain_string_content() {
        let v = serde_json::json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(extract_content(&v), Some("hi".to_string()));
    }

    #[test]
    fn extracts_array_of_parts_content() {
        let v = serde_json::json!({"choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}}]});
        assert_eq!(extract_content(&v), Some("ab".to_string()));
    }

    #[test]
    fn missing_choices_yields_none() {
        let v = serde_json::json!({});
        assert_eq!(extract_content(&v), None);
    }
}
