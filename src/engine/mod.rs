//! Conversation engine
//!
//! Drives one turn through `validate -> generate -> persist`. A turn that
//! fails at any point before persistence leaves its thread exactly as it
//! was. Turns on the same thread are serialized; turns on different
//! threads run independently.

mod locks;
pub mod title;
mod turn;

pub use locks::{ThreadGuard, ThreadLocks};
pub use title::{fallback_title, summarize_title};
pub use turn::TurnStream;

use crate::error::{ParleyError, Result};
use crate::providers::{ClientFactory, Message, ProviderKind, Role};
use crate::storage::{CheckpointStore, DisplayMessage, Session, SessionStore, SqliteStorage};
use std::fmt;
use std::sync::Arc;
use turn::TurnRecorder;

/// Request-scoped invocation parameters
///
/// Supplied fresh on every call and never written to storage. The type has
/// no `Serialize` impl and its `Debug` output redacts the key.
#[derive(Clone, PartialEq, Eq)]
pub struct InvocationConfig {
    /// Provider tag, e.g. "Google"
    pub provider: String,
    /// Model identifier; blank selects the provider default
    pub model: String,
    /// Credential for the provider
    pub api_key: String,
    /// Instruction prepended to the conversation; may be empty
    pub system_prompt: String,
}

impl InvocationConfig {
    /// Bundle the four invocation parameters
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: api_key.into(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Name used in user-facing messages about this provider
    fn provider_name(&self) -> String {
        self.provider
            .parse::<ProviderKind>()
            .map(|kind| kind.display_name().to_string())
            .unwrap_or_else(|_| self.provider.clone())
    }
}

impl fmt::Debug for InvocationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.api_key.is_empty() {
            "<empty>"
        } else {
            "<redacted>"
        };
        f.debug_struct("InvocationConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &key)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

/// One user turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Existing thread to continue; `None` starts a new session
    pub thread_id: Option<String>,
    /// Invocation parameters for this turn
    pub config: InvocationConfig,
    /// Raw user utterance
    pub utterance: String,
}

impl TurnRequest {
    /// Build a request for a new or existing thread
    pub fn new(
        thread_id: Option<String>,
        config: InvocationConfig,
        utterance: impl Into<String>,
    ) -> Self {
        Self {
            thread_id,
            config,
            utterance: utterance.into(),
        }
    }
}

/// Result of a whole-response turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    /// Thread the turn was recorded on
    pub thread_id: String,
    /// The assistant reply
    pub message: Message,
    /// Title assigned by this turn (first turn only)
    pub title: Option<String>,
}

/// How the caller wants the reply delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Wait for the whole reply
    Complete,
    /// Receive fragments as they are produced
    Stream,
}

/// Reply in the requested delivery mode
#[derive(Debug)]
pub enum TurnResponse {
    /// Whole reply, already persisted
    Complete(TurnReply),
    /// Fragment stream; persisted when exhausted
    Stream(TurnStream),
}

/// Thread prepared for generation
struct PreparedTurn {
    thread_id: String,
    history: Vec<Message>,
    user: Message,
    client: Box<dyn crate::providers::ChatClient>,
    guard: ThreadGuard,
}

/// Orchestrates turns over the session catalog, checkpoint log and gateway
pub struct ConversationEngine {
    recorder: TurnRecorder,
    locks: ThreadLocks,
}

impl ConversationEngine {
    /// Create an engine over explicit store and gateway implementations
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        gateway: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            recorder: TurnRecorder {
                sessions,
                checkpoints,
                gateway,
            },
            locks: ThreadLocks::new(),
        }
    }

    /// Create an engine whose stores both live in one SQLite database
    pub fn with_storage(storage: Arc<SqliteStorage>, gateway: Arc<dyn ClientFactory>) -> Self {
        Self::new(storage.clone(), storage, gateway)
    }

    /// Run one turn in the requested mode
    ///
    /// # Errors
    ///
    /// See [`send_turn`](Self::send_turn)
    pub async fn send(&self, request: TurnRequest, mode: ResponseMode) -> Result<TurnResponse> {
        match mode {
            ResponseMode::Complete => self.send_turn(request).await.map(TurnResponse::Complete),
            ResponseMode::Stream => self
                .send_turn_streaming(request)
                .await
                .map(TurnResponse::Stream),
        }
    }

    /// Run one turn and wait for the whole reply
    ///
    /// # Errors
    ///
    /// - `NotFound` if `thread_id` names no session
    /// - `MissingCredential`, `EmptyInput`, `UnsupportedProvider` before any
    ///   network call
    /// - `Provider` if generation fails
    /// - `Store` if the thread cannot be read
    /// - `UnpersistedReply` if the reply was generated but not recorded
    pub async fn send_turn(&self, request: TurnRequest) -> Result<TurnReply> {
        let config = request.config.clone();
        let turn = self.prepare(request).await?;

        let reply = match turn
            .client
            .complete(&config.system_prompt, &turn.history, &turn.user)
            .await
        {
            Ok(reply) => Message::assistant(reply.content),
            Err(e) => {
                tracing::warn!(thread_id = %turn.thread_id, "Turn failed: {}", e);
                return Err(e);
            }
        };

        let first_turn = turn.history.is_empty();
        let title = self
            .recorder
            .record(&turn.thread_id, &config, turn.user, reply.clone(), first_turn)
            .await?;
        drop(turn.guard);

        tracing::info!(thread_id = %turn.thread_id, "Turn persisted");
        Ok(TurnReply {
            thread_id: turn.thread_id,
            message: reply,
            title,
        })
    }

    /// Run one turn and stream the reply
    ///
    /// Errors raised before the first fragment are returned here; later
    /// failures arrive through the stream (see [`TurnStream`]).
    ///
    /// # Errors
    ///
    /// Same as [`send_turn`](Self::send_turn) up to the start of generation
    pub async fn send_turn_streaming(&self, request: TurnRequest) -> Result<TurnStream> {
        let config = request.config.clone();
        let turn = self.prepare(request).await?;

        let fragments = match turn
            .client
            .stream(&config.system_prompt, &turn.history, &turn.user)
            .await
        {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::warn!(thread_id = %turn.thread_id, "Turn failed: {}", e);
                return Err(e);
            }
        };

        let first_turn = turn.history.is_empty();
        Ok(TurnStream::new(
            turn.thread_id,
            fragments,
            self.recorder.clone(),
            config,
            turn.user,
            first_turn,
            turn.guard,
        ))
    }

    /// Resolve the thread, validate, lock the thread and replay its history
    async fn prepare(&self, request: TurnRequest) -> Result<PreparedTurn> {
        let TurnRequest {
            thread_id,
            config,
            utterance,
        } = request;

        let thread_id = match thread_id {
            Some(id) => {
                self.get_session(&id)?;
                id
            }
            None => {
                self.recorder
                    .sessions
                    .create_session(&config.provider, &config.model)?
                    .id
            }
        };

        tracing::info!(
            thread_id = %thread_id,
            provider = %config.provider,
            model = %config.model,
            "Starting turn"
        );

        let client = validate(&config, &utterance)
            .and_then(|()| {
                self.recorder.gateway.create_client(
                    &config.provider,
                    &config.model,
                    &config.api_key,
                )
            })
            .map_err(|e| {
                tracing::warn!(thread_id = %thread_id, "Turn rejected: {}", e);
                e
            })?;

        let guard = self.locks.acquire(&thread_id).await;
        // A delete may have run while this turn waited for the thread
        self.get_session(&thread_id)?;
        let history = self.recorder.checkpoints.load_thread(&thread_id)?;
        tracing::debug!(thread_id = %thread_id, history = history.len(), "Replaying thread");

        Ok(PreparedTurn {
            thread_id,
            history,
            user: Message::user(utterance),
            client,
            guard,
        })
    }

    /// Create an empty session
    pub fn create_session(&self, provider: &str, model: &str) -> Result<Session> {
        self.recorder.sessions.create_session(provider, model)
    }

    /// Look up a session
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id
    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.recorder
            .sessions
            .get_session(id)?
            .ok_or_else(|| ParleyError::NotFound(id.to_string()).into())
    }

    /// All sessions, most recently updated first
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.recorder.sessions.list_sessions()
    }

    /// A thread's messages as `{role, content}` pairs, oldest first
    pub fn load_thread_for_display(&self, thread_id: &str) -> Result<Vec<DisplayMessage>> {
        Ok(self
            .recorder
            .checkpoints
            .load_thread(thread_id)?
            .into_iter()
            .filter(|m| m.role != Role::System)
            .map(|m| DisplayMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            })
            .collect())
    }

    /// Delete a session together with its checkpoint log
    ///
    /// Waits for any in-flight turn on the thread. The log goes first so a
    /// failure never leaves orphaned messages behind a deleted session.
    pub async fn delete_session(&self, thread_id: &str) -> Result<()> {
        let _guard = self.locks.acquire(thread_id).await;
        self.recorder.checkpoints.delete_thread(thread_id)?;
        self.recorder.sessions.delete_session(thread_id)?;
        tracing::info!(thread_id, "Deleted session and thread");
        Ok(())
    }
}

/// Reject a turn that cannot be sent
fn validate(config: &InvocationConfig, utterance: &str) -> Result<()> {
    if config.api_key.trim().is_empty() {
        return Err(ParleyError::MissingCredential(config.provider_name()).into());
    }
    if utterance.trim().is_empty() {
        return Err(ParleyError::EmptyInput.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_key: &str) -> InvocationConfig {
        InvocationConfig::new("google", "gemini-3-pro", api_key, "be nice")
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let rendered = format!("{:?}", config("sk-secret-value"));
        assert!(!rendered.contains("sk-secret-value"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_validate_missing_key_names_provider() {
        let err = validate(&config(""), "Hello").unwrap_err();
        assert_eq!(err.to_string(), "Please enter your Google API key");
    }

    #[test]
    fn test_validate_missing_key_checked_before_input() {
        let err = validate(&config(" "), "").unwrap_err();
        assert!(matches!(
            crate::error::kind(&err),
            Some(ParleyError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_validate_empty_input() {
        let err = validate(&config("key"), " \n\t").unwrap_err();
        assert!(matches!(crate::error::kind(&err), Some(ParleyError::EmptyInput)));
    }

    #[test]
    fn test_validate_ok() {
        assert!(validate(&config("key"), "What is 2+2?").is_ok());
    }
}
