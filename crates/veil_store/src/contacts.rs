//! Contact queries.

use chrono::Utc;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::ContactRow;

impl Store {
    /// Insert a contact with a pending (empty) public key. Re-adding an
    /// existing contact only refreshes the nickname.
    pub async fn insert_contact(&self, peer_id: &str, nickname: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO contacts (peer_id, public_key, nickname, added_at) VALUES (?, '', ?, ?)
             ON CONFLICT(peer_id) DO UPDATE SET nickname = excluded.nickname",
        )
        .bind(peer_id)
        .bind(nickname)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a peer's public key, creating the contact row if needed.
    /// An existing nickname is preserved.
    pub async fn set_public_key(&self, peer_id: &str, public_key: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO contacts (peer_id, public_key, nickname, added_at) VALUES (?, ?, '', ?)
             ON CONFLICT(peer_id) DO UPDATE SET public_key = excluded.public_key",
        )
        .bind(peer_id)
        .bind(public_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn contact(&self, peer_id: &str) -> Result<Option<ContactRow>, StoreError> {
        let row = sqlx::query_as::<_, ContactRow>(
            "SELECT * FROM contacts WHERE peer_id = ? LIMIT 1",
        )
        .bind(peer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn contacts(&self) -> Result<Vec<ContactRow>, StoreError> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT * FROM contacts ORDER BY added_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn update_nickname(&self, peer_id: &str, nickname: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE contacts SET nickname = ? WHERE peer_id = ?")
            .bind(nickname)
            .bind(peer_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove the contact together with its conversation history.
    pub async fn delete_contact(&self, peer_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM contacts WHERE peer_id = ?")
            .bind(peer_id)
            .execute(&self.pool)
            .await?;
        self.delete_conversation(peer_id).await
    }
}
