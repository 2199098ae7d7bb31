//! Error types for Parley
//!
//! This module defines the error taxonomy shared by the session store,
//! checkpoint store, model gateway and conversation engine, using
//! `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Parley operations
///
/// Validation failures (`MissingCredential`, `EmptyInput`,
/// `UnsupportedProvider`) are raised before any network call. `Provider`
/// carries backend failures verbatim. `UnpersistedReply` is reserved for the
/// case where a reply was generated but could not be durably recorded, so a
/// caller can tell it apart from a generation failure.
#[derive(Error, Debug)]
pub enum ParleyError {
    /// No API key was supplied for the chosen provider
    #[error("Please enter your {0} API key")]
    MissingCredential(String),

    /// The user utterance was empty or whitespace only
    #[error("Cannot send an empty message")]
    EmptyInput,

    /// The provider tag is not one of the supported providers
    #[error("Unknown provider: {0}")]
    UnsupportedProvider(String),

    /// The backend failed (network, auth, quota, model errors)
    #[error("{provider} error: {cause}")]
    Provider {
        /// Display name of the provider that failed
        provider: String,
        /// Human-readable failure description
        cause: String,
    },

    /// Operation on a session or thread that does not exist
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Durable storage I/O failure
    #[error("Storage error: {0}")]
    Store(String),

    /// A reply was generated but the turn could not be recorded
    #[error("Reply could not be saved and may not survive a restart: {cause}")]
    UnpersistedReply {
        /// Thread the turn was directed at
        thread_id: String,
        /// The generated assistant text
        reply: String,
        /// Underlying storage failure
        cause: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ParleyError {
    /// Build a provider error from any displayable cause
    pub fn provider(provider: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Provider {
            provider: provider.into(),
            cause: cause.to_string(),
        }
    }

    /// Build a storage error from any displayable cause
    pub fn store(cause: impl std::fmt::Display) -> Self {
        Self::Store(cause.to_string())
    }
}

/// Result type alias for Parley operations
///
/// Uses `anyhow::Error` so call sites can attach context; the concrete
/// `ParleyError` is recovered with `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

/// Returns the `ParleyError` carried by an `anyhow::Error`, if any
pub fn kind(error: &anyhow::Error) -> Option<&ParleyError> {
    error.downcast_ref::<ParleyError>()
}
