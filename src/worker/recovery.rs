//! Recovery worker — drains the work queue into durable storage.
//!
//! Each envelope moves through a small retry state machine:
//! `Attempting(n) -> Success | Attempting(n+1) | DeadLettered`.
//! Transient store failures are retried with exponential backoff;
//! exhaustion produces exactly one dead-letter entry. The original
//! caller already received `accepted` and is never informed either way.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::StorageError;
use crate::event::{DlqEntry, EventEnvelope};
use crate::ingest::ports::{EventStore, WorkQueue};

/// Handle for requesting a worker stop.
///
/// The flag is observed between loop iterations: an envelope already
/// inside `process` runs to completion (success or DLQ) first.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Pulls envelopes from the queue and persists them with bounded
/// retries, dead-lettering terminal failures.
pub struct RecoveryWorker {
    queue: Arc<dyn WorkQueue>,
    store: Arc<dyn EventStore>,
    config: WorkerConfig,
    stop: Arc<AtomicBool>,
}

impl RecoveryWorker {
    /// Create a new worker.
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn EventStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping the run loop from outside.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Run until stopped. Intended for `tokio::spawn`.
    pub async fn run(self) {
        info!(
            max_retries = self.config.max_retries,
            poll_block_ms = self.config.poll_block_timeout.as_millis() as u64,
            "Recovery worker started"
        );

        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Queue pop failed, backing off");
                tokio::time::sleep(self.config.poll_block_timeout).await;
            }
        }

        info!("Recovery worker stopped");
    }

    /// Pop and process a single envelope. Returns whether one was
    /// processed.
    pub async fn run_once(&self) -> Result<bool, StorageError> {
        match self.queue.pop(self.config.poll_block_timeout).await? {
            Some(envelope) => {
                self.process(envelope).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Retry loop for one envelope. Never returns an error: the outcome
    /// is either a stored event or a dead-letter entry.
    async fn process(&self, envelope: EventEnvelope) {
        let mut last_error = String::from("unknown_error");

        for attempt in 1..=self.config.max_retries {
            let result = if self.forced_failure(&envelope) {
                Err(StorageError::Query("simulation_forced_failure".into()))
            } else {
                self.store.insert(&envelope.event).await
            };

            match result {
                Ok(()) => {
                    debug!(
                        event_id = %envelope.event.event_id,
                        provider_message_id = %envelope.event.provider_message_id,
                        attempt,
                        "Event persisted"
                    );
                    return;
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        event_id = %envelope.event.event_id,
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %last_error,
                        "Event insert failed"
                    );

                    if attempt < self.config.max_retries {
                        let backoff = self.config.base_backoff * 2u32.pow(attempt - 1);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }

        let entry = DlqEntry {
            failed_at: Utc::now().to_rfc3339(),
            retries: self.config.max_retries,
            error: last_error,
            event: envelope.event,
        };

        error!(
            event_id = %entry.event.event_id,
            provider_message_id = %entry.event.provider_message_id,
            retries = entry.retries,
            error = %entry.error,
            "Retry budget exhausted, dead-lettering event"
        );

        if let Err(e) = self.queue.push_dlq(&entry).await {
            error!(
                event_id = %entry.event.event_id,
                error = %e,
                "Failed to dead-letter event"
            );
        }
    }

    /// Simulation-mode failure injection, driven by the envelope itself
    /// so chaos drills are deterministic. Inert in normal operation.
    fn forced_failure(&self, envelope: &EventEnvelope) -> bool {
        self.config.simulation_mode
            && envelope.event.metadata.get("simulate_failure") == Some(&serde_json::Value::Bool(true))
    }
}
