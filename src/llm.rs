//! Text-generation and vision capabilities.
//!
//! Defines the [`TextGenerator`] and [`VisionModel`] traits the pipeline is
//! written against, plus concrete providers for any OpenAI-compatible
//! `/chat/completions` endpoint (Groq, OpenAI, vLLM, Ollama's compat layer).
//!
//! # Retry Strategy
//!
//! Both providers retry transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::{LlmConfig, VisionConfig};
use crate::models::{ChatMessage, Role};

/// A prompt message sent to a chat model.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptMessage {
    System(String),
    Human(String),
    Assistant(String),
}

impl PromptMessage {
    fn role(&self) -> &'static str {
        match self {
            PromptMessage::System(_) => "system",
            PromptMessage::Human(_) => "user",
            PromptMessage::Assistant(_) => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            PromptMessage::System(s) | PromptMessage::Human(s) | PromptMessage::Assistant(s) => s,
        }
    }
}

impl From<&ChatMessage> for PromptMessage {
    fn from(msg: &ChatMessage) -> Self {
        match msg.role {
            Role::Human => PromptMessage::Human(msg.content.clone()),
            Role::Assistant => PromptMessage::Assistant(msg.content.clone()),
        }
    }
}

/// Build a `system → history → human` message list.
pub fn with_history(system: &str, history: &[ChatMessage], human: &str) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::System(system.to_string()));
    messages.extend(history.iter().map(PromptMessage::from));
    messages.push(PromptMessage::Human(human.to_string()));
    messages
}

/// Text generation capability used for summarization, reformulation, and answers.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String>;
}

/// Vision capability: describe a base64-encoded image.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, image_base64: &str) -> Result<String>;
}

// ============ OpenAI-compatible chat ============

/// Chat model behind an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChat {
    /// Create a provider from configuration.
    ///
    /// The API key is read from the environment variable named by
    /// `api_key_env`; a missing key is allowed for local endpoints.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiChat {
    async fn generate(&self, messages: &[PromptMessage]) -> Result<String> {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role(), "content": m.content() }))
            .collect();
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        let response = post_chat_completion(
            &self.client,
            &self.base_url,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
        )
        .await?;
        parse_chat_response(&response)
    }
}

// ============ OpenAI-compatible vision ============

const DESCRIBE_PROMPT: &str = "Describe this image from a research document in detail. \
If it is a chart or plot, state the axes, units, series, and every readable numeric value. \
If it is a diagram, describe the components and how they connect. \
Do not guess values that are not legible.";

/// Vision model behind an OpenAI-compatible endpoint accepting `image_url` parts.
pub struct OpenAiVision {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiVision {
    pub fn new(config: &VisionConfig) -> Result<Self> {
        // Per-call timeouts are enforced by the describer; this one only guards the socket.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
        })
    }
}

#[async_trait]
impl VisionModel for OpenAiVision {
    async fn describe(&self, image_base64: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": DESCRIBE_PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", image_base64) }
                    }
                ]
            }],
        });
        // Vision calls are already bounded by a timeout and degrade to a
        // placeholder, so a single attempt is enough.
        let response =
            post_chat_completion(&self.client, &self.base_url, self.api_key.as_deref(), &body, 0)
                .await?;
        parse_chat_response(&response)
    }
}

async fn post_chat_completion(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    body: &Value,
    max_retries: u32,
) -> Result<Value> {
    let url = format!("{}/chat/completions", base_url);
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, ?delay, "retrying chat completion");
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "Chat API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("Chat API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
}

/// Extract `choices[0].message.content` from a chat completion response.
fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))?;
    Ok(content.trim().to_string())
}
