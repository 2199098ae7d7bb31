//! Base client trait and common message types for Parley
//!
//! This module defines the `ChatClient` trait that every provider variant
//! implements, the role-tagged `Message` that flows through the gateway and the
//! checkpoint log, and the helpers shared by the wire implementations.

use crate::error::{ParleyError, Result};
use crate::providers::ProviderKind;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

/// Sampling temperature applied to every outbound request
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instruction prepended to a request; never persisted as a turn
    System,
    /// The human side of a conversation
    User,
    /// The model side of a conversation
    Assistant,
}

impl Role {
    /// Lowercase wire/storage name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ParleyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ParleyError::Store(format!("Unknown message role: {}", other))),
        }
    }
}

/// Message structure for conversation
///
/// A message is only a role and a text payload. It deliberately has no room
/// for provider, model or credential data, which keeps persisted checkpoints
/// free of secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Text content of the message
    pub content: String,
}

impl Message {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::{Message, Role};
    ///
    /// let msg = Message::user("Hello, assistant!");
    /// assert_eq!(msg.role, Role::User);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::{Message, Role};
    ///
    /// let msg = Message::assistant("Hello, user!");
    /// assert_eq!(msg.role, Role::Assistant);
    /// ```
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Lazy, finite, non-restartable sequence of text fragments
///
/// A mid-stream failure is yielded as an `Err` item, after which the
/// stream ends.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Chat-completion capability shared by every provider variant
///
/// Providers are stateless per call: each invocation receives the full
/// reconstructed conversation (see [`assemble_messages`]).
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Which provider this client talks to
    fn provider(&self) -> ProviderKind;

    /// Model identifier requests are sent to
    fn model(&self) -> &str;

    /// Generate exactly one assistant message
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Provider` on any backend failure.
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<Message>;

    /// Generate an assistant reply as a stream of text fragments
    ///
    /// The outer `Result` fails when the request itself is rejected; failures
    /// after the first byte arrive as an `Err` item in the stream.
    async fn stream(
        &self,
        system_prompt: &str,
        history: &[Message],
        new_message: &Message,
    ) -> Result<TextStream>;
}

/// Build the request message list for one invocation
///
/// Order is `[system prompt (if non-empty)] + history (oldest first) + [new message]`.
///
/// # Examples
///
/// ```
/// use parley::providers::{assemble_messages, Message, Role};
///
/// let history = vec![Message::user("hi"), Message::assistant("hello")];
/// let all = assemble_messages("be brief", &history, &Message::user("bye"));
/// assert_eq!(all.len(), 4);
/// assert_eq!(all[0].role, Role::System);
/// assert_eq!(all[3].content, "bye");
/// ```
pub fn assemble_messages(
    system_prompt: &str,
    history: &[Message],
    new_message: &Message,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    if !system_prompt.trim().is_empty() {
        messages.push(Message::system(system_prompt));
    }
    messages.extend(history.iter().cloned());
    messages.push(new_message.clone());
    messages
}

/// Apply the whole-request limit to a single-shot call
///
/// Streamed bodies run as long as the model keeps producing; only the
/// client's connect timeout applies to them.
pub(crate) fn bounded(
    request: reqwest::RequestBuilder,
    stream: bool,
    timeout: Option<Duration>,
) -> reqwest::RequestBuilder {
    match timeout {
        Some(limit) if !stream => request.timeout(limit),
        _ => request,
    }
}

/// Convert a non-success HTTP response into a provider error
///
/// Pulls `error.message` out of a JSON body when the backend sends one,
/// otherwise falls back to the raw body text.
pub(crate) async fn ensure_success(
    kind: ProviderKind,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body).unwrap_or_else(|| body.trim().to_string());
    tracing::error!(provider = %kind, %status, "Provider returned error: {}", detail);

    let cause = if detail.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, detail)
    };
    Err(ParleyError::provider(kind.display_name(), cause).into())
}

/// Extract a readable message from a JSON error payload
pub(crate) fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .or_else(|| error.as_str().map(str::to_string))
}

/// Map a transport-level failure into a provider error
pub(crate) fn transport_error(kind: ProviderKind, err: reqwest::Error) -> anyhow::Error {
    tracing::warn!(provider = %kind, "Request failed: {}", err);
    ParleyError::provider(kind.display_name(), err).into()
}
