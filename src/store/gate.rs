//! libSQL idempotency gate.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, params};

use crate::error::StorageError;
use crate::ingest::ports::IdempotencyGate;

/// Idempotency gate backed by the `idempotency_keys` table.
///
/// `claim` is a single SQL statement, so it is atomic under SQLite's
/// writer lock for every connection to the same database, including
/// other processes. An expired key counts as absent and can be taken
/// over by the claim itself; no background sweeper is needed.
pub struct LibSqlGate {
    conn: Connection,
}

impl LibSqlGate {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IdempotencyGate for LibSqlGate {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM idempotency_keys WHERE key = ?1 AND expires_at_ms > ?2 LIMIT 1",
                params![key, now_ms],
            )
            .await
            .map_err(|e| StorageError::Query(format!("Gate exists failed: {e}")))?;

        let found = rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("Gate exists failed: {e}")))?
            .is_some();
        Ok(found)
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let now_ms = Utc::now().timestamp_millis();
        let expires_at_ms = now_ms + ttl.as_millis() as i64;

        // Insert-if-absent, or take over a key whose claim has expired.
        // Rows-changed tells us whether THIS call created the claim.
        let changed = self
            .conn
            .execute(
                "INSERT INTO idempotency_keys (key, claimed_at_ms, expires_at_ms)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     claimed_at_ms = excluded.claimed_at_ms,
                     expires_at_ms = excluded.expires_at_ms
                 WHERE idempotency_keys.expires_at_ms <= excluded.claimed_at_ms",
                params![key, now_ms, expires_at_ms],
            )
            .await
            .map_err(|e| StorageError::Query(format!("Gate claim failed: {e}")))?;

        Ok(changed == 1)
    }

    async fn release(&self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM idempotency_keys WHERE key = ?1", params![key])
            .await
            .map_err(|e| StorageError::Query(format!("Gate release failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::storage::Storage;

    async fn gate() -> (Storage, LibSqlGate) {
        let storage = Storage::memory().await.unwrap();
        let gate = LibSqlGate::new(storage.connection());
        (storage, gate)
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let (_storage, gate) = gate().await;
        assert!(gate.claim("k", Duration::from_secs(60)).await.unwrap());
        assert!(!gate.claim("k", Duration::from_secs(60)).await.unwrap());
        assert!(gate.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn release_reopens_the_key() {
        let (_storage, gate) = gate().await;
        assert!(gate.claim("k", Duration::from_secs(60)).await.unwrap());
        gate.release("k").await.unwrap();
        assert!(!gate.exists("k").await.unwrap());
        assert!(gate.claim("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_claim_is_absent_and_claimable() {
        let (_storage, gate) = gate().await;
        assert!(gate.claim("k", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!gate.exists("k").await.unwrap());
        // The new claim takes over the expired row in one statement.
        assert!(gate.claim("k", Duration::from_secs(60)).await.unwrap());
        assert!(gate.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn release_of_unknown_key_is_a_noop() {
        let (_storage, gate) = gate().await;
        gate.release("missing").await.unwrap();
    }
}
