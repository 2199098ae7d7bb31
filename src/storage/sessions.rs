use super::{format_timestamp, parse_timestamp, store_error, SessionStore, SqliteStorage};
use crate::error::{ParleyError, Result};
use crate::storage::types::{Session, DEFAULT_TITLE};
use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const SELECT_SESSION: &str = "SELECT s.id, s.title, s.created_at, s.updated_at, s.provider, s.model,
        (SELECT COUNT(*) FROM checkpoints c WHERE c.thread_id = s.id)
    FROM chat_sessions s";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;
    let message_count: i64 = row.get(6)?;

    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_timestamp(2, &created_at)?,
        updated_at: parse_timestamp(3, &updated_at)?,
        provider: row.get(4)?,
        model: row.get(5)?,
        message_count: message_count.max(0) as usize,
    })
}

impl SqliteStorage {
    /// Run an UPDATE that must hit exactly one session
    fn update_one(&self, id: &str, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn
            .execute(sql, params)
            .context("Failed to update session")
            .map_err(store_error)?;
        if changed == 0 {
            return Err(ParleyError::NotFound(id.to_string()).into());
        }
        Ok(())
    }
}

impl SessionStore for SqliteStorage {
    fn create_session(&self, provider: &str, model: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            provider: provider.to_string(),
            model: model.to_string(),
            message_count: 0,
        };

        let conn = self.connect()?;
        let stamp = format_timestamp(now);
        conn.execute(
            "INSERT INTO chat_sessions (id, title, created_at, updated_at, provider, model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![session.id, session.title, stamp, stamp, provider, model],
        )
        .context("Failed to insert session")
        .map_err(store_error)?;

        tracing::info!(session_id = %session.id, provider, model, "Created session");
        Ok(session)
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("{} WHERE s.id = ?1", SELECT_SESSION),
            params![id],
            session_from_row,
        )
        .optional()
        .context("Failed to query session")
        .map_err(store_error)
    }

    fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "{} ORDER BY s.updated_at DESC, s.created_at DESC",
                SELECT_SESSION
            ))
            .context("Failed to prepare statement")
            .map_err(store_error)?;

        let sessions = stmt
            .query_map([], session_from_row)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to query sessions")
            .map_err(store_error)?;

        Ok(sessions)
    }

    fn update_title(&self, id: &str, title: &str) -> Result<()> {
        self.update_one(
            id,
            "UPDATE chat_sessions SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        tracing::debug!(session_id = id, title, "Updated session title");
        Ok(())
    }

    fn touch(&self, id: &str) -> Result<()> {
        let now = format_timestamp(Utc::now());
        self.update_one(
            id,
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            params![now, id],
        )
    }

    fn delete_session(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        let removed = conn
            .execute("DELETE FROM chat_sessions WHERE id = ?1", params![id])
            .context("Failed to delete session")
            .map_err(store_error)?;
        if removed > 0 {
            tracing::info!(session_id = id, "Deleted session");
        }
        Ok(())
    }
}
