//! OpenAI-compatible chat completions client
//!
//! Serves OpenAI itself plus the providers that expose the same
//! `/chat/completions` wire format (Groq, OpenRouter). Only the base URL and
//! the provider tag differ between them.

use crate::error::{ParleyError, Result};
use crate::providers::base::{bounded, ensure_success, error_detail, transport_error};
use crate::providers::sse::{fragment_stream, Frame};
use crate::providers::{
    assemble_messages, ChatClient, Message, ProviderKind, TextStream, DEFAULT_TEMPERATURE,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for the OpenAI chat completions wire format
pub struct OpenAiClient {
    http: Client,
    kind: ProviderKind,
    model: String,
    api_key: String,
    base_url: String,
    request_timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
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
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client for one provider/model pair
    ///
    /// `base_url` is the API root, e.g. `https://api.openai.com/v1`.
    pub fn new(
        http: Client,
        kind: ProviderKind,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            kind,
            model: model.into(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: None,
        }
    }

    /// Limit how long a single-shot request may take in total
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [Message],
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(messages, stream);

        tracing::debug!(
            provider = %self.kind,
            model = %self.model,
            messages = messages.len(),
            stream,
            "Sending chat completion request"
        );

        let request = self.http.post(&url).bearer_auth(&self.api_key).json(&body);
        let response = bounded(request, stream, self.request_timeout)
            .send()
            .await
            .map_err(|e| transport_error(self.kind, e))?;

        ensure_success(self.kind, response).await
    }
}

/// Parse one streamed chunk payload
fn parse_chunk(data: &str) -> std::result::Result<Frame, String> {
    if data.trim() == "[DONE]" {
        return Ok(Frame::done());
    }
    if let Some(detail) = error_detail(data) {
        return Err(detail);
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_str(data).map_err(|e| format!("malformed stream chunk: {}", e))?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(Frame::skip());
    };

    // finish_reason chunks are followed by the `[DONE]` sentinel
    Ok(match choice.delta.content {
        Some(text) => Frame::text(text),
        None => Frame::skip(),
    })
}

#[async_trait]
impl ChatClient for OpenAiClient {
    fn provider(&self) -> ProviderKind {
        self.kind
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

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            ParleyError::provider(self.kind.display_name(), format!("invalid response: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ParleyError::provider(self.kind.display_name(), "no choices returned"))?
            .message
            .content
            .unwrap_or_default();

        Ok(Message::assistant(content))
    }

    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<TextStream> {
        let messages = assemble_messages(system_prompt, history, new_message);
        let response = self.send(&messages, true).await?;
        Ok(fragment_stream(self.kind, response, parse_chunk))
    }
}
