//! Ephemeral status queries. Statuses expire 24 hours after posting and
//! are purged by a periodic background task in the client engine.

use chrono::{Duration, Utc};
use tracing::debug;

use crate::db::Store;
use crate::error::StoreError;
use crate::models::StatusRow;

pub const STATUS_TTL_HOURS: i64 = 24;

impl Store {
    pub async fn insert_status(&self, peer_id: &str, content: &str) -> Result<i64, StoreError> {
        let now = Utc::now();
        let res = sqlx::query(
            "INSERT INTO statuses (peer_id, content, posted_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(peer_id)
        .bind(content)
        .bind(now)
        .bind(now + Duration::hours(STATUS_TTL_HOURS))
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn active_statuses(&self) -> Result<Vec<StatusRow>, StoreError> {
        let rows = sqlx::query_as::<_, StatusRow>(
            "SELECT * FROM statuses WHERE expires_at > ? ORDER BY posted_at DESC",
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Delete expired statuses; returns how many were purged.
    pub async fn purge_expired_statuses(&self) -> Result<u64, StoreError> {
        let res = sqlx::query("DELETE FROM statuses WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        let purged = res.rows_affected();
        if purged > 0 {
            debug!(purged, "expired statuses purged");
        }
        Ok(purged)
    }
}
