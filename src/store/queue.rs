//! libSQL work queue and dead-letter list.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, params};
use tokio::time::Instant;

use crate::error::StorageError;
use crate::event::{DlqEntry, EventEnvelope};
use crate::ingest::ports::WorkQueue;

/// How often a blocked pop re-checks for work.
const POP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Durable FIFO queue backed by the `work_queue` table, with terminal
/// failures in `dead_letters`.
///
/// Pop claims the oldest row with a single `DELETE .. RETURNING`, so
/// each envelope is delivered to exactly one concurrent popper; the
/// long-poll bound is emulated by re-polling until the block timeout
/// elapses.
pub struct LibSqlQueue {
    conn: Connection,
}

impl LibSqlQueue {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    async fn try_pop(&self) -> Result<Option<EventEnvelope>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "DELETE FROM work_queue
                 WHERE id = (SELECT id FROM work_queue ORDER BY id LIMIT 1)
                 RETURNING payload",
                (),
            )
            .await
            .map_err(|e| StorageError::Query(format!("Queue pop failed: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("Queue pop failed: {e}")))?
        {
            Some(row) => {
                let payload: String = row
                    .get(0)
                    .map_err(|e| StorageError::Query(format!("Bad queue row: {e}")))?;
                let envelope = serde_json::from_str(&payload).map_err(|e| {
                    StorageError::Serialization(format!("Bad envelope payload: {e}"))
                })?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl WorkQueue for LibSqlQueue {
    async fn push(&self, envelope: &EventEnvelope) -> Result<(), StorageError> {
        let payload = serde_json::to_string(envelope)
            .map_err(|e| StorageError::Serialization(format!("Envelope encode failed: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO work_queue (payload, enqueued_at) VALUES (?1, ?2)",
                params![payload, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| StorageError::Query(format!("Queue push failed: {e}")))?;
        Ok(())
    }

    async fn pop(&self, block_timeout: Duration) -> Result<Option<EventEnvelope>, StorageError> {
        let deadline = Instant::now() + block_timeout;
        loop {
            if let Some(envelope) = self.try_pop().await? {
                return Ok(Some(envelope));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn push_dlq(&self, entry: &DlqEntry) -> Result<(), StorageError> {
        let event = serde_json::to_string(&entry.event)
            .map_err(|e| StorageError::Serialization(format!("DLQ event encode failed: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO dead_letters (failed_at, retries, error, event)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.failed_at.as_str(),
                    entry.retries as i64,
                    entry.error.as_str(),
                    event
                ],
            )
            .await
            .map_err(|e| StorageError::Query(format!("DLQ push failed: {e}")))?;
        Ok(())
    }

    async fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT failed_at, retries, error, event
                 FROM dead_letters ORDER BY id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| StorageError::Query(format!("DLQ read failed: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("DLQ read failed: {e}")))?
        {
            let failed_at: String = row
                .get(0)
                .map_err(|e| StorageError::Query(format!("Bad DLQ row: {e}")))?;
            let retries: i64 = row
                .get(1)
                .map_err(|e| StorageError::Query(format!("Bad DLQ row: {e}")))?;
            let error: String = row
                .get(2)
                .map_err(|e| StorageError::Query(format!("Bad DLQ row: {e}")))?;
            let event_json: String = row
                .get(3)
                .map_err(|e| StorageError::Query(format!("Bad DLQ row: {e}")))?;
            let event = serde_json::from_str(&event_json)
                .map_err(|e| StorageError::Serialization(format!("Bad DLQ event: {e}")))?;

            entries.push(DlqEntry {
                failed_at,
                retries: retries as u32,
                error,
                event,
            });
        }
        Ok(entries)
    }
}
