//! libSQL token bucket rate limiter.

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, TransactionBehavior, params};

use crate::config::LimiterConfig;
use crate::error::StorageError;
use crate::ingest::ports::RateLimiter;

/// Per-tenant token bucket backed by the `rate_buckets` table.
///
/// The whole load-refill-consume-store sequence runs inside one
/// immediate transaction. `BEGIN IMMEDIATE` takes the database writer
/// lock up front, so concurrent consumers for the same tenant — from
/// any connection or process on the same database — serialize and each
/// observe the previous caller's write.
pub struct LibSqlTokenBucket {
    conn: Connection,
    capacity: f64,
    refill_rate_per_second: f64,
}

impl LibSqlTokenBucket {
    pub fn new(conn: Connection, config: &LimiterConfig) -> Self {
        Self {
            conn,
            capacity: config.capacity,
            refill_rate_per_second: config.refill_rate_per_second,
        }
    }

    /// Bucket-record expiry, in ms from now. Idle tenants' rows are
    /// reclaimed once they would have fully refilled twice over. With
    /// no organic refill the row must never be reclaimed, since that
    /// would silently restore quota.
    fn expiry_ms(&self, now_ms: i64) -> Option<i64> {
        if self.refill_rate_per_second > 0.0 {
            let ttl_secs = (2.0 * self.capacity / self.refill_rate_per_second).ceil() as i64;
            Some(now_ms + ttl_secs * 1000)
        } else {
            None
        }
    }
}

#[async_trait]
impl RateLimiter for LibSqlTokenBucket {
    async fn consume(&self, tenant_id: &str) -> Result<bool, StorageError> {
        let now_ms = Utc::now().timestamp_millis();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(|e| StorageError::Query(format!("Bucket transaction failed: {e}")))?;

        // Reclaim idle buckets opportunistically, the way the backing
        // store's native key expiry would.
        tx.execute(
            "DELETE FROM rate_buckets
             WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
            params![now_ms],
        )
        .await
        .map_err(|e| StorageError::Query(format!("Bucket sweep failed: {e}")))?;

        let mut rows = tx
            .query(
                "SELECT tokens, updated_at_ms FROM rate_buckets WHERE tenant_id = ?1",
                params![tenant_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("Bucket load failed: {e}")))?;

        let (tokens, updated_at_ms) = match rows
            .next()
            .await
            .map_err(|e| StorageError::Query(format!("Bucket load failed: {e}")))?
        {
            Some(row) => {
                let tokens = row
                    .get::<f64>(0)
                    .map_err(|e| StorageError::Query(format!("Bad bucket row: {e}")))?;
                let updated_at_ms = row
                    .get::<i64>(1)
                    .map_err(|e| StorageError::Query(format!("Bad bucket row: {e}")))?;
                (tokens, updated_at_ms)
            }
            None => (self.capacity, now_ms),
        };

        let elapsed_ms = (now_ms - updated_at_ms).max(0);
        let refill = elapsed_ms as f64 / 1000.0 * self.refill_rate_per_second;
        let mut tokens = (tokens + refill).min(self.capacity);

        let allowed = tokens >= 1.0;
        if allowed {
            tokens -= 1.0;
        }

        // Persist on BOTH outcomes. A denied request still advances
        // updated_at so a dense train of denials cannot accumulate
        // phantom refill credit once it stops.
        tx.execute(
            "INSERT INTO rate_buckets (tenant_id, tokens, updated_at_ms, expires_at_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 tokens = excluded.tokens,
                 updated_at_ms = excluded.updated_at_ms,
                 expires_at_ms = excluded.expires_at_ms",
            params![tenant_id, tokens, now_ms, self.expiry_ms(now_ms)],
        )
        .await
        .map_err(|e| StorageError::Query(format!("Bucket store failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Query(format!("Bucket commit failed: {e}")))?;

        Ok(allowed)
    }
}
