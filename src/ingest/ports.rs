//! Collaborator ports for the admission pipeline.
//!
//! The orchestrator and worker only ever see these traits; the libSQL
//! adapters in `crate::store` and the in-memory fakes in
//! `crate::ingest::memory` are the two implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::event::{ConversationEvent, DlqEntry, EventEnvelope};

/// Exclusive, TTL-bounded claim over an external identifier.
#[async_trait]
pub trait IdempotencyGate: Send + Sync {
    /// Non-mutating check for a live (unexpired) claim.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Atomically create the key if and only if absent, with expiry
    /// `ttl`. Returns whether THIS call created it.
    ///
    /// Implementations must perform this as a single atomic operation
    /// against the shared backing store, never as check-then-set:
    /// concurrent callers race on the same key.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    /// Delete the key unconditionally, re-opening the identifier for a
    /// future successful claim.
    async fn release(&self, key: &str) -> Result<(), StorageError>;
}

/// Per-tenant admission quota.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consume one unit of the tenant's quota. Returns whether the
    /// request is allowed. The whole refill-and-consume decision is
    /// atomic per tenant under concurrent callers.
    async fn consume(&self, tenant_id: &str) -> Result<bool, StorageError>;
}

/// Durable hand-off between the admission path and the worker.
///
/// Delivery to consumers is at-least-once; the event store's idempotent
/// insert is the second line of defense against redelivery.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Durable enqueue.
    async fn push(&self, envelope: &EventEnvelope) -> Result<(), StorageError>;

    /// Long-poll dequeue bounded by `block_timeout`. Returns `None` on
    /// timeout with no work available.
    async fn pop(&self, block_timeout: Duration) -> Result<Option<EventEnvelope>, StorageError>;

    /// Append a terminal-failure record to the dead-letter list.
    async fn push_dlq(&self, entry: &DlqEntry) -> Result<(), StorageError>;

    /// Read the newest dead-letter entries. Diagnostic surface only;
    /// never part of the admission or worker control flow.
    async fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, StorageError>;
}

/// Idempotent persistence of admitted events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert the event. Safe to call twice for the same
    /// `provider_message_id`: the second call is a no-op.
    async fn insert(&self, event: &ConversationEvent) -> Result<(), StorageError>;

    /// Count stored rows for a provider message id. Diagnostic only.
    async fn count_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<u64, StorageError>;
}
