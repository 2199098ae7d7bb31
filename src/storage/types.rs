use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to a session until its first turn is summarized
pub const DEFAULT_TITLE: &str = "New Chat";

/// Metadata for a stored conversation session
///
/// Sessions never carry message bodies; those live in the checkpoint log
/// keyed by the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for the session, also the checkpoint thread id
    pub id: String,
    /// User-friendly title
    pub title: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session last received a turn
    pub updated_at: DateTime<Utc>,
    /// Provider tag in effect when the session was created
    pub provider: String,
    /// Model in effect when the session was created
    pub model: String,
    /// Number of messages in the session's checkpoint log
    pub message_count: usize,
}

/// A message rendered for display, oldest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMessage {
    /// `user` or `assistant`
    pub role: String,
    /// Text content
    pub content: String,
}
