//! Anthropic Messages API client
//!
//! Anthropic takes the system prompt as a top-level field rather than as a
//! message, so system messages are pulled out of the assembled list before
//! the request is built.

use crate::error::{ParleyError, Result};
use crate::providers::base::{bounded, ensure_success, transport_error};
use crate::providers::sse::{fragment_stream, Frame};
use crate::providers::{
    assemble_messages, ChatClient, Message, ProviderKind, Role, TextStream, DEFAULT_TEMPERATURE,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Client for the Anthropic Messages API
pub struct AnthropicClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    request_timeout: Option<Duration>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

/// Streamed event; only the fields the reply text depends on
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    delta_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

impl AnthropicClient {
    /// Create a client for one model
    ///
    /// `base_url` is the API root, e.g. `https://api.anthropic.com/v1`.
    pub fn new(
        http: Client,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Limit how long a single-shot request may take in total
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn build_request<'a>(&'a self, messages: &'a [Message], stream: bool) -> MessagesRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: DEFAULT_TEMPERATURE,
            stream,
        }
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        let body = self.build_request(messages, stream);

        tracing::debug!(
            provider = %ProviderKind::Anthropic,
            model = %self.model,
            messages = body.messages.len(),
            stream,
            "Sending messages request"
        );

        let request = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response = bounded(request, stream, self.request_timeout)
            .send()
            .await
            .map_err(|e| transport_error(ProviderKind::Anthropic, e))?;

        ensure_success(ProviderKind::Anthropic, response).await
    }
}

fn parse_event(data: &str) -> std::result::Result<Frame, String> {
    let event: StreamEvent =
        serde_json::from_str(data).map_err(|e| format!("malformed stream event: {}", e))?;

    match event.event_type.as_str() {
        "content_block_delta" => {
            let text = event
                .delta
                .filter(|d| d.delta_type.as_deref() == Some("text_delta"))
                .and_then(|d| d.text);
            Ok(text.map(Frame::text).unwrap_or_else(Frame::skip))
        }
        "message_stop" => Ok(Frame::done()),
        "error" => Err(event
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown stream error".to_string())),
        _ => Ok(Frame::skip()),
    }
}

#[async_trait]
impl ChatClient for AnthropicClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<Message> {
        let messages = assemble_messages(system_prompt, history, new_message);
        let response = self.send(&messages, false).await?;

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            ParleyError::provider(
                ProviderKind::Anthropic.display_name(),
                format!("invalid response: {}", e),
            )
        })?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text)
            .collect();

        Ok(Message::assistant(text))
    }

    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<TextStream> {
        let messages = assemble_messages(system_prompt, history, new_message);
        let response = self.send(&messages, true).await?;
        Ok(fragment_stream(ProviderKind::Anthropic, response, parse_event))
    }
}
