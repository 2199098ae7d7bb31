//! Durable session catalog and checkpoint log
//!
//! Both stores live in one SQLite file but are addressed independently: the
//! `chat_sessions` table holds metadata only, the `checkpoints` table holds
//! the ordered message log of each thread. Every mutation is committed
//! before the call returns.

use crate::error::{ParleyError, Result};
use crate::providers::Message;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod checkpoints;
mod sessions;
pub mod types;

pub use types::{DisplayMessage, Session, DEFAULT_TITLE};

/// How long a writer waits for a competing transaction before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable catalog of conversation threads
pub trait SessionStore: Send + Sync {
    /// Create a session titled "New Chat" with a fresh id
    fn create_session(&self, provider: &str, model: &str) -> Result<Session>;

    /// Look up a session; `None` when the id is unknown
    fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// All sessions, most recently updated first
    fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Replace the title. Fails with `NotFound` for an unknown id.
    fn update_title(&self, id: &str, title: &str) -> Result<()>;

    /// Advance `updated_at` to now. Fails with `NotFound` for an unknown id.
    fn touch(&self, id: &str) -> Result<()>;

    /// Remove the session row; deleting an unknown id is a no-op
    fn delete_session(&self, id: &str) -> Result<()>;
}

/// Durable, thread-keyed append log of conversation messages
pub trait CheckpointStore: Send + Sync {
    /// Every message of the thread in insertion order; empty if never written
    fn load_thread(&self, thread_id: &str) -> Result<Vec<Message>>;

    /// Append messages to the end of the thread as one atomic unit
    fn append_turn(&self, thread_id: &str, messages: &[Message]) -> Result<()>;

    /// Remove the whole thread; deleting an unknown thread is a no-op
    fn delete_thread(&self, thread_id: &str) -> Result<()>;
}

/// SQLite-backed implementation of both stores
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a storage instance in the user's data directory
    pub fn new() -> Result<Self> {
        Self::new_with_path(default_db_path()?)
    }

    /// Create a storage instance at the given database path
    ///
    /// Parent directories are created as needed and the schema is
    /// initialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::{SessionStore, SqliteStorage};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("history.db")).unwrap();
    /// assert!(storage.list_sessions().unwrap().is_empty());
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| ParleyError::store(format!("{:#}", e)))?;
        }

        let storage = Self { db_path };
        storage.init()?;
        tracing::debug!(path = %storage.db_path.display(), "Opened history database");
        Ok(storage)
    }

    /// Create a storage instance from an optional configured path
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::new_with_path(path),
            None => Self::new(),
        }
    }

    /// Location of the database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Resolve a full session id from the id itself or a unique prefix
    ///
    /// Returns `None` when nothing matches; fails when the prefix matches
    /// more than one session.
    pub fn resolve_session_id(&self, id_or_prefix: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let pattern = format!("{}%", escape_like(id_or_prefix));
        let mut stmt = conn
            .prepare("SELECT id FROM chat_sessions WHERE id LIKE ?1 ESCAPE '\\' LIMIT 2")
            .context("Failed to prepare statement")
            .map_err(store_error)?;
        let ids = stmt
            .query_map([pattern], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to resolve session id")
            .map_err(store_error)?;

        if ids.iter().any(|id| id == id_or_prefix) {
            return Ok(Some(id_or_prefix.to_string()));
        }
        match ids.len() {
            0 => Ok(None),
            1 => Ok(ids.into_iter().next()),
            _ => Err(ParleyError::store(format!(
                "Session id prefix '{}' is ambiguous",
                id_or_prefix
            ))
            .into()),
        }
    }

    /// Open a connection with the shared pragmas applied
    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(store_error)?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to configure database")
            .map_err(store_error)?;
        Ok(conn)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, seq)
            );",
        )
        .context("Failed to create tables")
        .map_err(store_error)?;
        Ok(())
    }
}

/// Default database location: `<data dir>/history.db`
pub fn default_db_path() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("dev", "parley", "parley")
        .ok_or_else(|| ParleyError::store("Could not determine data directory"))?;
    Ok(proj_dirs.data_dir().join("history.db"))
}

pub(crate) fn store_error(e: anyhow::Error) -> anyhow::Error {
    tracing::error!("Storage failure: {:#}", e);
    ParleyError::store(format!("{:#}", e)).into()
}

/// Timestamps are stored at fixed precision so text order is time order
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
