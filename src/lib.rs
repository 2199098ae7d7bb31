//! Parley - multi-provider conversational assistant library
//!
//! This library provides a session-checkpointed conversation engine: every
//! conversation is a durable thread whose messages are replayed to one of
//! several interchangeable model providers on each turn.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `engine`: Turn state machine, per-thread serialization, title summarizer
//! - `storage`: SQLite session catalog and checkpoint log
//! - `providers`: Model gateway and provider wire clients
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli` / `commands`: Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use parley::engine::{ConversationEngine, InvocationConfig, TurnRequest};
//! use parley::providers::ModelGateway;
//! use parley::storage::SqliteStorage;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(SqliteStorage::new()?);
//!     let gateway = Arc::new(ModelGateway::new(Duration::from_secs(60))?);
//!     let engine = ConversationEngine::with_storage(storage, gateway);
//!
//!     let config = InvocationConfig::new("OpenAI", "gpt-4o", "sk-...", "Be brief.");
//!     let reply = engine
//!         .send_turn(TurnRequest::new(None, config, "What is 2+2?"))
//!         .await?;
//!     println!("{} (thread {})", reply.message.content, reply.thread_id);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod providers;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use engine::{ConversationEngine, InvocationConfig, TurnReply, TurnRequest, TurnStream};
pub use error::{ParleyError, Result};
pub use providers::{ChatClient, ClientFactory, Message, ModelGateway, ProviderKind, Role};
pub use storage::{CheckpointStore, Session, SessionStore, SqliteStorage};
