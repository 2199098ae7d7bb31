//! Google Gemini client
//!
//! Gemini names the assistant role `model` and carries the system prompt in
//! a separate `systemInstruction` field.

use crate::error::{ParleyError, Result};
use crate::providers::base::{bounded, ensure_success, error_detail, transport_error};
use crate::providers::sse::{fragment_stream, Frame};
use crate::providers::{
    assemble_messages, ChatClient, Message, ProviderKind, Role, TextStream, DEFAULT_TEMPERATURE,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for the Gemini `generateContent` API
pub struct GeminiClient {
    http: Client,
    model: String,
    api_key: String,
    base_url: String,
    request_timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<OwnedPart>,
}

#[derive(Debug, Serialize)]
struct OwnedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finished(&self) -> bool {
        self.candidates
            .first()
            .map(|c| c.finish_reason.is_some())
            .unwrap_or(false)
    }

    fn blocked(&self) -> Option<String> {
        if !self.candidates.is_empty() {
            return None;
        }
        let reason = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
            .unwrap_or_else(|| "no candidates returned".to_string());
        Some(format!("response blocked: {}", reason))
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

impl GeminiClient {
    /// Create a client for one model
    ///
    /// `base_url` is the API root, e.g.
    /// `https://generativelanguage.googleapis.com/v1beta`.
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
        }
    }

    /// Limit how long a single-shot request may take in total
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn build_request<'a>(&self, messages: &'a [Message]) -> GenerateContentRequest<'a> {
        let system: Vec<OwnedPart> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| OwnedPart {
                text: m.content.clone(),
            })
            .collect();

        GenerateContentRequest {
            contents: messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| Content {
                    role: wire_role(m.role),
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            system_instruction: (!system.is_empty()).then_some(SystemInstruction { parts: system }),
            generation_config: GenerationConfig {
                temperature: DEFAULT_TEMPERATURE,
            },
        }
    }

    fn endpoint(&self, stream: bool) -> String {
        if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse",
                self.base_url, self.model
            )
        } else {
            format!("{}/models/{}:generateContent", self.base_url, self.model)
        }
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        let body = self.build_request(messages);

        tracing::debug!(
            provider = %ProviderKind::Google,
            model = %self.model,
            contents = body.contents.len(),
            stream,
            "Sending generateContent request"
        );

        let request = self
            .http
            .post(self.endpoint(stream))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let response = bounded(request, stream, self.request_timeout)
            .send()
            .await
            .map_err(|e| transport_error(ProviderKind::Google, e))?;

        ensure_success(ProviderKind::Google, response).await
    }
}

fn parse_chunk(data: &str) -> std::result::Result<Frame, String> {
    if let Some(detail) = error_detail(data) {
        return Err(detail);
    }

    let chunk: GenerateContentResponse =
        serde_json::from_str(data).map_err(|e| format!("malformed stream chunk: {}", e))?;
    if let Some(blocked) = chunk.blocked() {
        return Err(blocked);
    }

    let text = chunk.text();
    Ok(Frame {
        text: (!text.is_empty()).then_some(text),
        done: chunk.finished(),
    })
}

#[async_trait]
impl ChatClient for GeminiClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Google
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

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            ParleyError::provider(
                ProviderKind::Google.display_name(),
                format!("invalid response: {}", e),
            )
        })?;

        if let Some(blocked) = parsed.blocked() {
            return Err(ParleyError::provider(ProviderKind::Google.display_name(), blocked).into());
        }

        Ok(Message::assistant(parsed.text()))
    }

    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<TextStream> {
        let messages = assemble_messages(system_prompt, history, new_message);
        let response = self.send(&messages, true).await?;
        Ok(fragment_stream(ProviderKind::Google, response, parse_chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GeminiClient {
        GeminiClient::new(Client::new(), "gemini-2.5-flash", "key", "http://localhost/v1beta/")
    }

    #[test]
    fn test_build_request_maps_roles_and_system_instruction() {
        let client = client();
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        let messages = assemble_messages("be terse", &history, &Message::user("bye"));
        let json = serde_json::to_value(client.build_request(&messages)).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "bye");
        assert_eq!(json["generationConfig"]["temperature"], 0.7);
    }

    #[test]
    fn test_endpoint_for_streaming_uses_sse() {
        let client = client();
        assert_eq!(
            client.endpoint(false),
            "http://localhost/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert!(client.endpoint(true).ends_with(":streamGenerateContent?alt=sse"));
    }

    #[test]
    fn test_parse_chunk_text_then_finish() {
        let partial = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}],"role":"model"}}]}"#;
        assert_eq!(parse_chunk(partial).unwrap(), Frame::text("Hel"));

        let last = r#"{"candidates":[{"content":{"parts":[{"text":"lo"}],"role":"model"},"finishReason":"STOP"}]}"#;
        let frame = parse_chunk(last).unwrap();
        assert_eq!(frame.text.as_deref(), Some("lo"));
        assert!(frame.done);
    }

    #[test]
    fn test_parse_chunk_blocked_prompt() {
        let data = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert_eq!(parse_chunk(data).unwrap_err(), "response blocked: SAFETY");
    }

    #[test]
    fn test_parse_chunk_error_payload() {
        let data = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(parse_chunk(data).unwrap_err(), "API key not valid");
    }
}
