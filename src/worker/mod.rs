//! Background processing — the queue-draining recovery worker.

pub mod recovery;

pub use recovery::{RecoveryWorker, StopHandle};
