//! Provider module for Parley
//!
//! This module contains the model gateway: the closed set of supported
//! providers, the `ChatClient` capability they share, and the factory that
//! builds a client from `(provider, model, api_key)`.

pub mod anthropic;
pub mod base;
pub mod google;
pub mod openai;
pub(crate) mod sse;

pub use anthropic::AnthropicClient;
pub use base::{assemble_messages, ChatClient, Message, Role, TextStream, DEFAULT_TEMPERATURE};
pub use google::GeminiClient;
pub use openai::OpenAiClient;

use crate::config::ProviderConfig;
use crate::error::{ParleyError, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Supported LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Google Gemini
    Google,
    /// OpenAI
    OpenAi,
    /// Anthropic Claude
    Anthropic,
    /// Groq (OpenAI-compatible)
    Groq,
    /// OpenRouter (OpenAI-compatible)
    OpenRouter,
}

impl ProviderKind {
    /// Every provider, in catalog order
    pub const ALL: [ProviderKind; 5] = [
        Self::Google,
        Self::OpenAi,
        Self::Anthropic,
        Self::Groq,
        Self::OpenRouter,
    ];

    /// Human-readable provider name, also used as the canonical tag
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::OpenAi => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::Groq => "Groq",
            Self::OpenRouter => "OpenRouter",
        }
    }

    /// Environment variable the API key is read from
    pub fn env_key(&self) -> &'static str {
        match self {
            Self::Google => "GEMINI_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// API root used when no override is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Google => "https://generativelanguage.googleapis.com/v1beta",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Suggested models; the first entry is the default
    pub fn models(&self) -> &'static [&'static str] {
        match self {
            Self::Google => &[
                "gemini-3-pro",
                "gemini-3-flash",
                "gemini-2.5-pro",
                "gemini-2.5-flash",
                "gemini-2.5-flash-lite",
                "gemini-2.0-flash",
            ],
            Self::OpenAi => &["gpt-5.2", "gpt-5", "gpt-5-mini", "o3", "o3-mini", "o1", "gpt-4o"],
            Self::Anthropic => &[
                "claude-opus-4.5",
                "claude-sonnet-4.5",
                "claude-haiku-4.5",
                "claude-opus-4",
                "claude-sonnet-4",
                "claude-3.5-sonnet-20241022",
            ],
            Self::Groq => &[
                "llama-4-maverick-17b-128e-instruct",
                "llama-4-scout-17b-16e-instruct",
                "llama-3.3-70b-versatile",
                "llama-3.3-70b-specdec",
                "deepseek-r1-distill-llama-70b",
                "qwen-qwq-32b",
                "mixtral-8x7b-32768",
            ],
            Self::OpenRouter => &[
                "google/gemini-3-pro",
                "openai/gpt-5.2",
                "anthropic/claude-opus-4.5",
                "anthropic/claude-sonnet-4.5",
                "meta-llama/llama-4-maverick",
                "deepseek/deepseek-v3",
                "xai/grok-code-fast-1",
                "qwen/qwen-2.5-coder-32b-instruct",
                "mistralai/devstral-2",
            ],
        }
    }

    /// Model used when the caller does not pick one
    pub fn default_model(&self) -> &'static str {
        self.models()[0]
    }

    /// API key from the provider's environment variable, if set and non-blank
    pub fn api_key_from_env(&self) -> Option<String> {
        std::env::var(self.env_key())
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProviderKind {
    type Err = ParleyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tag = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.display_name().eq_ignore_ascii_case(tag))
            .ok_or_else(|| ParleyError::UnsupportedProvider(tag.to_string()))
    }
}

/// Builds chat clients from a provider tag, model and credential
///
/// The conversation engine depends on this seam rather than on
/// [`ModelGateway`] so tests can substitute scripted clients.
pub trait ClientFactory: Send + Sync {
    /// Create a client for one invocation
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::UnsupportedProvider` for an unknown tag and
    /// `ParleyError::MissingCredential` for a blank `api_key`.
    fn create_client(
        &self,
        provider: &str,
        model: &str,
        api_key: &str,
    ) -> Result<Box<dyn ChatClient>>;
}

/// HTTP-backed client factory
///
/// Holds one connection pool shared by every client it creates.
#[derive(Debug, Clone)]
pub struct ModelGateway {
    http: Client,
    base_urls: HashMap<ProviderKind, String>,
    request_timeout: Duration,
}

impl ModelGateway {
    /// Create a gateway with the given request timeout
    ///
    /// The timeout bounds connecting and, for single-shot calls, the whole
    /// request. Streamed replies are not cut off while they are still
    /// arriving.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("parley/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_urls: HashMap::new(),
            request_timeout: timeout,
        })
    }

    /// Create a gateway from the provider section of the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a `base_urls` key is not a known provider or the
    /// HTTP client cannot be built
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut gateway = Self::new(Duration::from_secs(config.timeout_seconds))?;
        for (tag, url) in &config.base_urls {
            let kind: ProviderKind = tag.parse()?;
            gateway = gateway.with_base_url(kind, url.clone());
        }
        Ok(gateway)
    }

    /// Point one provider at a different API root
    pub fn with_base_url(mut self, kind: ProviderKind, url: impl Into<String>) -> Self {
        self.base_urls.insert(kind, url.into());
        self
    }

    /// API root in effect for `kind`
    pub fn base_url(&self, kind: ProviderKind) -> &str {
        self.base_urls
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_base_url())
    }
}

impl ClientFactory for ModelGateway {
    fn create_client(
        &self,
        provider: &str,
        model: &str,
        api_key: &str,
    ) -> Result<Box<dyn ChatClient>> {
        let kind: ProviderKind = provider.parse()?;
        if api_key.trim().is_empty() {
            return Err(ParleyError::MissingCredential(kind.display_name().to_string()).into());
        }

        let model = match model.trim() {
            "" => kind.default_model(),
            m => m,
        };
        let base_url = self.base_url(kind).to_string();

        tracing::debug!(provider = %kind, model, %base_url, "Creating chat client");

        let client: Box<dyn ChatClient> = match kind {
            ProviderKind::Google => Box::new(
                GeminiClient::new(self.http.clone(), model, api_key, base_url)
                    .with_request_timeout(self.request_timeout),
            ),
            ProviderKind::Anthropic => Box::new(
                AnthropicClient::new(self.http.clone(), model, api_key, base_url)
                    .with_request_timeout(self.request_timeout),
            ),
            ProviderKind::OpenAi | ProviderKind::Groq | ProviderKind::OpenRouter => Box::new(
                OpenAiClient::new(self.http.clone(), kind, model, api_key, base_url)
                    .with_request_timeout(self.request_timeout),
            ),
        };
        Ok(client)
    }
}
