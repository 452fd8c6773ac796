//! Receipt tracking: correlates inbound `delivered` / `read_all` receipts
//! with stored outbound messages.
//!
//! A `delivered` receipt carries the rowid the sender recorded at send
//! time (the peer echoes it back), so correlation is a direct id lookup.
//! `read_all` is conversation-scoped and marks every sent message at
//! once. Both paths are idempotent; re-applied receipts change nothing.

use std::sync::Arc;

use tracing::{debug, warn};

use veil_store::{MessageKind, NewMessage, Store};

use crate::error::ClientError;

pub struct ReceiptTracker {
    store: Arc<Store>,
}

impl ReceiptTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Record an outbound message before it goes on the wire and return
    /// the rowid that will travel inside the frame as `message_ref_id`.
    pub async fn record_outbound(
        &self,
        conversation_id: &str,
        sender: &str,
        content: &str,
        kind: MessageKind,
        file_path: Option<String>,
    ) -> Result<i64, ClientError> {
        let id = self
            .store
            .insert_message(NewMessage {
                conversation_id: conversation_id.to_string(),
                sender: sender.to_string(),
                content: content.to_string(),
                kind,
                file_path,
                sent_by_me: true,
                is_delivered: false,
                is_read: false,
            })
            .await?;
        Ok(id)
    }

    /// Peer confirmed delivery of one message.
    pub async fn apply_delivered(&self, message_ref_id: i64) -> Result<(), ClientError> {
        match self.store.message(message_ref_id).await? {
            Some(_) => {
                self.store.mark_delivered(message_ref_id).await?;
                debug!(message_ref_id, "delivery receipt applied");
            }
            None => warn!(message_ref_id, "delivery receipt for unknown message"),
        }
        Ok(())
    }

    /// Peer opened the conversation: every message we sent them is read.
    pub async fn apply_read_all(&self, conversation_id: &str) -> Result<(), ClientError> {
        self.store.mark_sent_read(conversation_id).await?;
        debug!(conversation_id, "read_all receipt applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn temp_tracker() -> (ReceiptTracker, Arc<Store>, std::path::PathBuf) {
        let path = std::path::PathBuf::from(format!("/tmp/veil-receipts-test-{}.db", Uuid::new_v4()));
        let store = Arc::new(Store::open(&path).await.unwrap());
        (ReceiptTracker::new(store.clone()), store, path)
    }

    #[tokio::test]
    async fn delivered_receipt_is_idempotent() {
        let (tracker, store, path) = temp_tracker().await;

        let id = tracker
            .record_outbound("bob", "alice", "hi", MessageKind::Text, None)
            .await
            .unwrap();
        let row = store.message(id).await.unwrap().unwrap();
        assert!(!row.is_delivered);
        assert!(!row.is_read);

        tracker.apply_delivered(id).await.unwrap();
        tracker.apply_delivered(id).await.unwrap();
        let row = store.message(id).await.unwrap().unwrap();
        assert!(row.is_delivered);
        assert!(!row.is_read);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn read_all_marks_only_sent_messages() {
        let (tracker, store, path) = temp_tracker().await;

        let sent = tracker
            .record_outbound("bob", "alice", "hi", MessageKind::Text, None)
            .await
            .unwrap();
        let received = store
            .insert_message(NewMessage {
                conversation_id: "bob".into(),
                sender: "bob".into(),
                content: "hello".into(),
                kind: MessageKind::Text,
                file_path: None,
                sent_by_me: false,
                is_delivered: true,
                is_read: false,
            })
            .await
            .unwrap();

        tracker.apply_read_all("bob").await.unwrap();
        assert!(store.message(sent).await.unwrap().unwrap().is_read);
        assert!(!store.message(received).await.unwrap().unwrap().is_read);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn receipt_for_unknown_message_is_harmless() {
        let (tracker, _store, path) = temp_tracker().await;
        tracker.apply_delivered(9999).await.unwrap();
        std::fs::remove_file(&path).ok();
    }
}
