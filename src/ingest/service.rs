//! Admission orchestrator — decides whether an event enters the pipeline.
//!
//! `admit` is an uncoordinated saga across two external systems (the
//! idempotency gate and the work queue) with no shared transaction.
//! Stages advance Claimed → RateChecked → Enqueued; every failure past
//! Claimed must release the claim before surfacing the outcome.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GateConfig;
use crate::error::IngestError;
use crate::event::{ConversationEvent, EventEnvelope};
use crate::ingest::ports::{IdempotencyGate, RateLimiter, WorkQueue};

/// Result of an admission attempt. Duplicate and rate-limited are
/// expected outcomes, not errors; callers treat duplicate as a
/// success-no-op and may retry a rate-limited request as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitOutcome {
    Accepted { event_id: Uuid },
    Duplicate,
    RateLimited,
}

/// Derive the gate key for a provider message id.
///
/// The key space is global across tenants: the same provider id from
/// two tenants dedupes to one admission. Documented behavior, flagged
/// for product review before anyone scopes it per tenant.
pub fn idempotency_key(provider_message_id: &str) -> String {
    format!("idempotency:{provider_message_id}")
}

/// Composes the gate, limiter, and queue into the admit decision.
pub struct IngestionService {
    gate: Arc<dyn IdempotencyGate>,
    limiter: Arc<dyn RateLimiter>,
    queue: Arc<dyn WorkQueue>,
    claim_ttl: Duration,
}

impl IngestionService {
    /// Create a new ingestion service.
    pub fn new(
        gate: Arc<dyn IdempotencyGate>,
        limiter: Arc<dyn RateLimiter>,
        queue: Arc<dyn WorkQueue>,
        config: GateConfig,
    ) -> Self {
        Self {
            gate,
            limiter,
            queue,
            claim_ttl: config.ttl,
        }
    }

    /// Admit an event into durable processing at most once.
    ///
    /// Sequence (the ordering is part of the contract):
    /// 1. A live claim on the key means a duplicate.
    /// 2. Claim the key; losing the race to a concurrent caller also
    ///    means a duplicate.
    /// 3. Consume tenant quota; on denial the claim is rolled back so
    ///    the same identifier can be retried once quota is available.
    /// 4. Enqueue; on failure the claim is rolled back and the error
    ///    propagates, since no durability has been established.
    pub async fn admit(
        &self,
        event: ConversationEvent,
    ) -> Result<AdmitOutcome, IngestError> {
        let key = idempotency_key(&event.provider_message_id);

        if self.gate.exists(&key).await.map_err(IngestError::Gate)? {
            debug!(
                provider_message_id = %event.provider_message_id,
                "Admission rejected: live claim"
            );
            return Ok(AdmitOutcome::Duplicate);
        }

        let claimed = self
            .gate
            .claim(&key, self.claim_ttl)
            .await
            .map_err(IngestError::Gate)?;
        if !claimed {
            debug!(
                provider_message_id = %event.provider_message_id,
                "Admission rejected: lost claim race"
            );
            return Ok(AdmitOutcome::Duplicate);
        }

        // Claimed. From here on every failure path must compensate.
        let allowed = match self.limiter.consume(&event.tenant_id).await {
            Ok(allowed) => allowed,
            Err(e) => {
                self.release_claim(&key, "limiter error").await;
                return Err(IngestError::Limiter(e));
            }
        };
        if !allowed {
            self.gate
                .release(&key)
                .await
                .map_err(IngestError::Gate)?;
            info!(
                tenant_id = %event.tenant_id,
                provider_message_id = %event.provider_message_id,
                "Admission rejected: tenant over quota, claim rolled back"
            );
            return Ok(AdmitOutcome::RateLimited);
        }

        // RateChecked. The push is the durability point.
        let event_id = event.event_id;
        let envelope = EventEnvelope { event };
        if let Err(e) = self.queue.push(&envelope).await {
            // The caller must learn the event is NOT durably queued and
            // that the identifier is free to retry, so the push error
            // wins over any release failure.
            self.release_claim(&key, "queue push failed").await;
            return Err(IngestError::QueuePush(e));
        }

        // Enqueued.
        info!(
            event_id = %event_id,
            tenant_id = %envelope.event.tenant_id,
            channel = envelope.event.channel_type.label(),
            provider_message_id = %envelope.event.provider_message_id,
            "Event admitted"
        );
        Ok(AdmitOutcome::Accepted { event_id })
    }

    /// Best-effort compensation: release the claim, log on failure.
    async fn release_claim(&self, key: &str, reason: &str) {
        if let Err(e) = self.gate.release(key).await {
            warn!(key, reason, error = %e, "Failed to roll back idempotency claim");
        }
    }
}
