//! Configuration management for Parley
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//!
//! API keys are deliberately absent from every type here. They are resolved
//! per call from the provider's environment variable or `--api-key` and only
//! ever travel inside the transient `InvocationConfig`.

use crate::error::{ParleyError, Result};
use crate::providers::ProviderKind;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for Parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider selection and transport settings
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Conversation defaults
    #[serde(default)]
    pub chat: ChatConfig,
    /// History database location
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider used when none is given on the command line
    #[serde(default = "default_provider")]
    pub default: String,

    /// Model used when none is given; falls back to the provider's default
    #[serde(default)]
    pub model: Option<String>,

    /// Per-provider API root overrides, keyed by provider tag
    #[serde(default)]
    pub base_urls: HashMap<String, String>,

    /// Request timeout for provider calls
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_provider() -> String {
    ProviderKind::Google.display_name().to_string()
}

fn default_timeout_seconds() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            model: None,
            base_urls: HashMap::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl ProviderConfig {
    /// The configured default provider
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::UnsupportedProvider` for an unknown tag
    pub fn default_kind(&self) -> Result<ProviderKind> {
        Ok(self.default.parse()?)
    }

    /// Model to use with `kind` when the caller does not name one
    ///
    /// The configured model only applies to the configured default provider;
    /// any other provider gets its own catalog default.
    pub fn model_for(&self, kind: ProviderKind) -> String {
        let configured = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());

        match (configured, self.default_kind()) {
            (Some(model), Ok(default)) if default == kind => model.to_string(),
            _ => kind.default_model().to_string(),
        }
    }
}

/// Conversation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// System prompt prepended to every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Stream replies fragment by fragment
    #[serde(default = "default_streaming")]
    pub streaming: bool,
}

fn default_system_prompt() -> String {
    "You are a helpful and friendly AI assistant.".to_string()
}

fn default_streaming() -> bool {
    true
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            streaming: default_streaming(),
        }
    }
}

/// History database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file; defaults to `history.db` in the platform data dir
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &Path, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("dev", "parley", "parley")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml"))
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(ParleyError::Io)?;
        let config = serde_yaml::from_str(&contents).map_err(ParleyError::Yaml)?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(provider) = std::env::var("PARLEY_PROVIDER") {
            self.provider.default = provider;
        }

        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            self.provider.model = Some(model);
        }

        if let Ok(prompt) = std::env::var("PARLEY_SYSTEM_PROMPT") {
            self.chat.system_prompt = prompt;
        }

        if let Ok(streaming) = std::env::var("PARLEY_STREAMING") {
            match parse_bool(&streaming) {
                Some(value) => self.chat.streaming = value,
                None => tracing::warn!("Invalid PARLEY_STREAMING: {}", streaming),
            }
        }

        if let Ok(path) = std::env::var("PARLEY_HISTORY_DB") {
            tracing::debug!("Using history database from PARLEY_HISTORY_DB: {}", path);
            self.storage.path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.history_db {
            self.storage.path = Some(path.clone());
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = self.provider.default_kind() {
            return Err(ParleyError::Config(format!(
                "{}. Must be one of: {}",
                e,
                ProviderKind::ALL
                    .iter()
                    .map(|k| k.display_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
            .into());
        }

        if self.provider.timeout_seconds == 0 {
            return Err(ParleyError::Config(
                "provider.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        for (tag, url) in &self.provider.base_urls {
            if tag.parse::<ProviderKind>().is_err() {
                return Err(ParleyError::Config(format!(
                    "provider.base_urls has unknown provider: {}",
                    tag
                ))
                .into());
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ParleyError::Config(format!(
                    "provider.base_urls.{} must be an http(s) URL",
                    tag
                ))
                .into());
            }
        }

        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
