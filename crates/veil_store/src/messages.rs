//! Message queries. Delivered/read flags are mutated in place by the
//! receipt tracker; message content is never rewritten after insert.

use chrono::Utc;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::{MessageRow, NewMessage};

impl Store {
    /// Insert a message and return its rowid.
    pub async fn insert_message(&self, msg: NewMessage) -> Result<i64, StoreError> {
        let res = sqlx::query(
            "INSERT INTO messages
               (conversation_id, sender, content, kind, file_path, timestamp,
                sent_by_me, is_delivered, is_read)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.conversation_id)
        .bind(&msg.sender)
        .bind(&msg.content)
        .bind(msg.kind.as_str())
        .bind(&msg.file_path)
        .bind(Utc::now())
        .bind(msg.sent_by_me)
        .bind(msg.is_delivered)
        .bind(msg.is_read)
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY timestamp ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn message(&self, id: i64) -> Result<Option<MessageRow>, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE id = ? LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Latest message per conversation, newest conversation first.
    pub async fn conversation_previews(&self) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages
             WHERE id IN (SELECT MAX(id) FROM messages GROUP BY conversation_id)
             ORDER BY timestamp DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn unread_count(&self, conversation_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ? AND sent_by_me = 0 AND is_read = 0",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Idempotent: re-marking a delivered message is a no-op.
    pub async fn mark_delivered(&self, message_id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE messages SET is_delivered = 1 WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark every message we sent in this conversation as read
    /// (the peer issued a `read_all` receipt).
    pub async fn mark_sent_read(&self, conversation_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE conversation_id = ? AND sent_by_me = 1",
        )
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark every message we received in this conversation as read
    /// (the local user opened it).
    pub async fn mark_incoming_read(&self, conversation_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE messages SET is_read = 1 WHERE conversation_id = ? AND sent_by_me = 0",
        )
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_message(&self, message_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
