//! HTTP surface — ingest routes plus internal diagnostics.

pub mod routes;

pub use routes::{AppState, router};
