//! In-memory port implementations.
//!
//! Process-local stand-ins for the libSQL adapters, used by unit tests
//! and small deployments that do not need durability. Atomicity comes
//! from holding the state lock across each whole operation, which is
//! only a guarantee within a single process.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::StorageError;
use crate::event::{ConversationEvent, DlqEntry, EventEnvelope};
use crate::ingest::ports::{EventStore, IdempotencyGate, RateLimiter, WorkQueue};

// ── Idempotency gate ────────────────────────────────────────────────

/// In-memory TTL map keyed by idempotency key.
#[derive(Default)]
pub struct MemoryGate {
    claims: Mutex<HashMap<String, Instant>>,
}

impl MemoryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired claims. Called on every access, like the backing
    /// store's native expiry would.
    fn cleanup(claims: &mut HashMap<String, Instant>) {
        let now = Instant::now();
        claims.retain(|_, expires_at| *expires_at > now);
    }
}

#[async_trait]
impl IdempotencyGate for MemoryGate {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut claims = self.claims.lock().await;
        Self::cleanup(&mut claims);
        Ok(claims.contains_key(key))
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let mut claims = self.claims.lock().await;
        Self::cleanup(&mut claims);
        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), StorageError> {
        self.claims.lock().await.remove(key);
        Ok(())
    }
}

// ── Token bucket ────────────────────────────────────────────────────

struct Bucket {
    tokens: f64,
    updated_at: Instant,
}

/// In-memory per-tenant token bucket.
pub struct MemoryTokenBucket {
    capacity: f64,
    refill_rate_per_second: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryTokenBucket {
    pub fn new(capacity: f64, refill_rate_per_second: f64) -> Self {
        Self {
            capacity,
            refill_rate_per_second,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryTokenBucket {
    async fn consume(&self, tenant_id: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(tenant_id.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            updated_at: now,
        });

        let elapsed = now.saturating_duration_since(bucket.updated_at);
        let refill = elapsed.as_secs_f64() * self.refill_rate_per_second;
        bucket.tokens = (bucket.tokens + refill).min(self.capacity);

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        // Denied requests still advance updated_at: a dense train of
        // denials must not accumulate phantom refill credit.
        bucket.updated_at = now;
        Ok(allowed)
    }
}

// ── Work queue ──────────────────────────────────────────────────────

/// In-memory FIFO queue with a dead-letter list.
#[derive(Default)]
pub struct MemoryQueue {
    queue: Mutex<VecDeque<EventEnvelope>>,
    dlq: Mutex<Vec<DlqEntry>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of envelopes currently queued.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Snapshot of the dead-letter list, oldest first.
    pub async fn dlq(&self) -> Vec<DlqEntry> {
        self.dlq.lock().await.clone()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, envelope: &EventEnvelope) -> Result<(), StorageError> {
        self.queue.lock().await.push_back(envelope.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, block_timeout: Duration) -> Result<Option<EventEnvelope>, StorageError> {
        let deadline = Instant::now() + block_timeout;
        loop {
            if let Some(envelope) = self.queue.lock().await.pop_front() {
                return Ok(Some(envelope));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Woken by a push or by the deadline, whichever comes first.
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn push_dlq(&self, entry: &DlqEntry) -> Result<(), StorageError> {
        self.dlq.lock().await.push(entry.clone());
        Ok(())
    }

    async fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, StorageError> {
        let dlq = self.dlq.lock().await;
        Ok(dlq.iter().rev().take(limit).cloned().collect())
    }
}

// ── Event store ─────────────────────────────────────────────────────

/// In-memory event store with insert-if-absent semantics.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<ConversationEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of stored events, insertion order.
    pub async fn events(&self) -> Vec<ConversationEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: &ConversationEvent) -> Result<(), StorageError> {
        let mut events = self.events.lock().await;
        if events
            .iter()
            .any(|e| e.provider_message_id == event.provider_message_id)
        {
            return Ok(());
        }
        events.push(event.clone());
        Ok(())
    }

    async fn count_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<u64, StorageError> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|e| e.provider_message_id == provider_message_id)
            .count() as u64)
    }
}
