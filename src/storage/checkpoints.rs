use super::{format_timestamp, store_error, CheckpointStore, SqliteStorage};
use crate::error::Result;
use crate::providers::{Message, Role};
use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, TransactionBehavior};

impl CheckpointStore for SqliteStorage {
    fn load_thread(&self, thread_id: &str) -> Result<Vec<Message>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT role, content FROM checkpoints WHERE thread_id = ?1 ORDER BY seq")
            .context("Failed to prepare statement")
            .map_err(store_error)?;

        let rows = stmt
            .query_map(params![thread_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .context("Failed to load thread")
            .map_err(store_error)?;

        rows.into_iter()
            .map(|(role, content)| -> Result<Message> {
                let role: Role = role.parse()?;
                Ok(Message { role, content })
            })
            .collect()
    }

    fn append_turn(&self, thread_id: &str, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut conn = self.connect()?;
        // IMMEDIATE takes the write lock up front so the seq read below
        // cannot race another appender on the same thread.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to start transaction")
            .map_err(store_error)?;

        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )
            .context("Failed to read thread position")
            .map_err(store_error)?;

        let now = format_timestamp(Utc::now());
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO checkpoints (thread_id, seq, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .context("Failed to prepare statement")
                .map_err(store_error)?;

            for (offset, message) in messages.iter().enumerate() {
                stmt.execute(params![
                    thread_id,
                    next_seq + offset as i64,
                    message.role.as_str(),
                    message.content,
                    now
                ])
                .context("Failed to append message")
                .map_err(store_error)?;
            }
        }

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(store_error)?;

        tracing::debug!(
            thread_id,
            appended = messages.len(),
            position = next_seq,
            "Appended turn"
        );
        Ok(())
    }

    fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let conn = self.connect()?;
        let removed = conn
            .execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
            )
            .context("Failed to delete thread")
            .map_err(store_error)?;
        tracing::debug!(thread_id, removed, "Deleted thread");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::providers::{Message, Role};
    use crate::storage::tests::create_test_storage;
    use crate::storage::CheckpointStore;

    #[test]
    fn test_load_thread_never_written_is_empty() {
        let (storage, _dir) = create_test_storage();
        assert!(storage.load_thread("fresh").unwrap().is_empty());
    }

    #[test]
    fn test_append_turn_preserves_order_across_turns() {
        let (storage, _dir) = create_test_storage();
        storage
            .append_turn("t", &[Message::user("one"), Message::assistant("two")])
            .unwrap();
        storage
            .append_turn("t", &[Message::user("three"), Message::assistant("four")])
            .unwrap();

        let thread = storage.load_thread("t").unwrap();
        let contents: Vec<&str> = thread.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three", "four"]);
        assert_eq!(thread[0].role, Role::User);
        assert_eq!(thread[3].role, Role::Assistant);
    }

    #[test]
    fn test_threads_are_isolated() {
        let (storage, _dir) = create_test_storage();
        storage.append_turn("a", &[Message::user("for a")]).unwrap();
        storage.append_turn("b", &[Message::user("for b")]).unwrap();

        assert_eq!(storage.load_thread("a").unwrap(), vec![Message::user("for a")]);
        assert_eq!(storage.load_thread("b").unwrap(), vec![Message::user("for b")]);
    }

    #[test]
    fn test_append_does_not_validate_content() {
        let (storage, _dir) = create_test_storage();
        storage
            .append_turn("t", &[Message::user(""), Message::assistant("  ")])
            .unwrap();
        assert_eq!(storage.load_thread("t").unwrap().len(), 2);
    }

    #[test]
    fn test_append_empty_slice_is_noop() {
        let (storage, _dir) = create_test_storage();
        storage.append_turn("t", &[]).unwrap();
        assert!(storage.load_thread("t").unwrap().is_empty());
    }

    #[test]
    fn test_delete_thread_is_idempotent() {
        let (storage, _dir) = create_test_storage();
        storage.append_turn("t", &[Message::user("x")]).unwrap();

        storage.delete_thread("t").unwrap();
        storage.delete_thread("t").unwrap();
        assert!(storage.load_thread("t").unwrap().is_empty());
    }
}
