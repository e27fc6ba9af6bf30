//! AI adapter: provider abstraction over the chat-completion endpoint.
//!
//! Failure isolation is the whole job here: a missing credential is
//! reported without a network call (`is_available`), and any transport or
//! API error becomes `FactoidError::Llm` with the original message kept
//! for logging. Raw reqwest errors never reach the pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::error::FactoidError;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Raw completion text for the given prompt.
    async fn complete(&self, prompt: &str) -> Result<String, FactoidError>;

    /// Checkable without request latency; callers short-circuit to the
    /// fallback generator when this is false.
    fn is_available(&self) -> bool;

    /// Model identifier for envelopes and diagnostics.
    fn model_name(&self) -> &str;
}

pub type SharedLlm = Arc<dyn LlmClient>;

/// Factory: build a client according to config and environment.
///
/// * If `FACTOID_AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if config is disabled or has no credential, returns `NullLlm`.
/// * Else the real OpenAI client.
pub fn build_llm_from_config(config: &AiConfig) -> SharedLlm {
    if std::env::var("FACTOID_AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockLlm::new(
            r#"[{"text": "Mock insight", "insight_type": "general"}]"#,
        ));
    }
    if !config.has_credential() {
        return Arc::new(NullLlm);
    }
    Arc::new(OpenAiClient::new(config.clone()))
}

// ------------------------------------------------------------
// OpenAI provider (Chat Completions API)
// ------------------------------------------------------------

pub struct OpenAiClient {
    http: reqwest::Client,
    cfg: AiConfig,
}

impl OpenAiClient {
    pub fn new(cfg: AiConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("council-factoids/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { http, cfg }
    }
}

const SYSTEM_PROMPT: &str =
    "You generate concise factual insights about UK local council finances. \
     Follow the output requirements in the user message exactly.";

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, FactoidError> {
        if !self.is_available() {
            return Err(FactoidError::LlmUnavailable);
        }

        let req = ChatRequest {
            model: &self.cfg.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        };

        let resp = self
            .http
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.cfg.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| FactoidError::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FactoidError::Llm(format!(
                "API returned {status}: {body}"
            )));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| FactoidError::Llm(e.to_string()))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(FactoidError::Llm("empty completion".to_string()));
        }
        Ok(content)
    }

    fn is_available(&self) -> bool {
        self.cfg.has_credential()
    }

    fn model_name(&self) -> &str {
        &self.cfg.model
    }
}

// ------------------------------------------------------------
// Null + mock clients
// ------------------------------------------------------------

/// Used when AI is disabled or unconfigured. Never touches the network.
pub struct NullLlm;

#[async_trait]
impl LlmClient for NullLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, FactoidError> {
        Err(FactoidError::LlmUnavailable)
    }

    fn is_available(&self) -> bool {
        false
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

/// Deterministic client for tests: fixed response, call counting.
pub struct MockLlm {
    response: String,
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _prompt: &str) -> Result<String, FactoidError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_fails_without_network() {
        let cfg = AiConfig {
            api_key: String::new(),
            ..AiConfig::default()
        };
        let client = OpenAiClient::new(cfg);
        assert!(!client.is_available());
        let err = client.complete("prompt").await.unwrap_err();
        assert!(matches!(err, FactoidError::LlmUnavailable));
    }

    #[tokio::test]
    async fn mock_counts_calls() {
        let mock = MockLlm::new("[]");
        let _ = mock.complete("a").await;
        let _ = mock.complete("b").await;
        assert_eq!(mock.call_count(), 2);
    }
}
