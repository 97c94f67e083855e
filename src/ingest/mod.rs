//! Admission pipeline — the at-most-once front door.
//!
//! Every inbound event flows through:
//! 1. `IdempotencyGate` — exclusive claim on the provider message id
//! 2. `RateLimiter` — per-tenant token bucket
//! 3. `WorkQueue` — durable hand-off to the recovery worker

pub mod memory;
pub mod ports;
pub mod service;

pub use ports::{EventStore, IdempotencyGate, RateLimiter, WorkQueue};
pub use service::{AdmitOutcome, IngestionService, idempotency_key};
