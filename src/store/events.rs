//! libSQL conversation event store.

use async_trait::async_trait;
use libsql::{Connection, params};

use crate::error::StorageError;
use crate::event::ConversationEvent;
use crate::ingest::ports::EventStore;

/// Event persistence backed by the `conversation_events` table.
///
/// The table is keyed uniquely by `provider_message_id` and the insert
/// is `INSERT OR IGNORE`, so a redelivered envelope lands on the
/// existing row instead of creating a second one. This is the last
/// line of defense when the idempotency gate was bypassed or expired.
pub struct LibSqlEventStore {
    conn: Connection,
}

impl LibSqlEventStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventStore for LibSqlEventStore {
    async fn insert(&self, event: &ConversationEvent) -> Result<(), StorageError> {
        let metadata = serde_json::to_string(&event.metadata)
            .map_err(|e| StorageError::Serialization(format!("Metadata encode failed: {e}")))?;
        let raw_metadata = serde_json::to_string(&event.raw_metadata)
            .map_err(|e| StorageError::Serialization(format!("Raw metadata encode failed: {e}")))?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO conversation_events
                     (id, provider_message_id, tenant_id, channel, timestamp,
                      content, metadata, raw_metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.event_id.to_string(),
                    event.provider_message_id.as_str(),
                    event.tenant_id.as_str(),
                    event.channel_type.label(),
                    event.timestamp.as_str(),
                    event.content.as_str(),
                    metadata,
                    raw_metadata,
                ],
            )
            .await
            .map_err(|e| StorageError::Query(format!("Event insert failed: {e}")))?;
        Ok(())
    }

    async fn count_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<u64, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM conversation_events WHERE provider_message_id = ?1",
                params![provider_message_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("Event count failed: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("Event count failed: {e}")))?
        {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StorageError::Query(format!("Bad count row: {e}")))?;
                Ok(count as u64)
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::event::ChannelType;
    use crate::store::storage::Storage;

    fn event(provider_message_id: &str, content: &str) -> ConversationEvent {
        ConversationEvent {
            event_id: Uuid::new_v4(),
            provider_message_id: provider_message_id.into(),
            tenant_id: "tenant-1".into(),
            channel_type: ChannelType::Sms,
            timestamp: "2026-02-09T10:00:00Z".into(),
            content: content.into(),
            metadata: serde_json::json!({"from": "+1", "to": "+2"}),
            raw_metadata: serde_json::json!({"Body": content}),
        }
    }

    async fn store() -> (Storage, LibSqlEventStore) {
        let storage = Storage::memory().await.unwrap();
        let store = LibSqlEventStore::new(storage.connection());
        (storage, store)
    }

    #[tokio::test]
    async fn insert_then_count() {
        let (_storage, store) = store().await;
        store.insert(&event("SM-1", "hello")).await.unwrap();

        assert_eq!(store.count_by_provider_message_id("SM-1").await.unwrap(), 1);
        assert_eq!(store.count_by_provider_message_id("SM-2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_insert_keeps_one_row() {
        let (_storage, store) = store().await;
        store.insert(&event("SM-1", "first")).await.unwrap();
        // Same provider id, different event id and content: ignored.
        store.insert(&event("SM-1", "second")).await.unwrap();

        assert_eq!(store.count_by_provider_message_id("SM-1").await.unwrap(), 1);
    }
}
