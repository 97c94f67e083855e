//! Error types for the ingest gateway.

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Backing-store errors shared by the gate, limiter, queue, and event store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Infrastructure failures surfaced by `IngestionService::admit`.
///
/// Duplicate and rate-limited admissions are NOT errors — they are
/// expected `AdmitOutcome` variants. These cover the cases where a
/// backing system itself failed and the caller must know the event
/// was not durably queued.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Idempotency gate unavailable: {0}")]
    Gate(#[source] StorageError),

    #[error("Rate limiter unavailable: {0}")]
    Limiter(#[source] StorageError),

    #[error("Queue push failed: {0}")]
    QueuePush(#[source] StorageError),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
