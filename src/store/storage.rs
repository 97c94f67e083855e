//! libSQL database handle — open, migrate, hand out connections.
//!
//! Supports local file and in-memory databases. `libsql::Connection` is
//! `Send + Sync` and safe for concurrent async use; the adapters each
//! hold a clone of the same connection.

use std::path::Path;
use std::sync::Arc;

use libsql::{Connection, Database};
use tracing::info;

use crate::error::StorageError;
use crate::store::migrations;

/// Shared libSQL database for the gate, limiter, queue, and event store.
pub struct Storage {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl Storage {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Open(format!("Failed to open libSQL database: {e}")))?;

        let storage = Self::from_db(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(storage)
    }

    /// Create an in-memory database (for tests).
    pub async fn memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::Open(format!("Failed to create in-memory database: {e}")))?;

        Self::from_db(db).await
    }

    async fn from_db(db: Database) -> Result<Self, StorageError> {
        let conn = db
            .connect()
            .map_err(|e| StorageError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// A connection handle for an adapter.
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }
}
