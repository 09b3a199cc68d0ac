//! Typed transfer errors, classified so the retry policy can decide
//! what is worth another attempt.

use std::time::Duration;
use thiserror::Error;

/// Error produced by a part fetch or a lifecycle phase.
///
/// The variants map one-to-one onto how the engine reacts: `Transient`
/// and `Corrupt` are retried, `RateLimited` waits out the provider
/// hint, `Fatal` fails the job, `Cancelled` is terminal and never
/// retried.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network blip, timeout, short read. Retried with backoff.
    #[error("transient: {0}")]
    Transient(String),
    /// Provider asked us to slow down; `retry_after` is its wait hint.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    /// Authorization failure, locator not found, disk full. Fails the job.
    #[error("fatal: {0}")]
    Fatal(String),
    /// Caller-initiated cancellation. Terminal.
    #[error("cancelled")]
    Cancelled,
    /// Scratch bytes disagree with the manifest; the affected part is re-fetched.
    #[error("corrupt scratch data: {0}")]
    Corrupt(String),
}

impl TransferError {
    pub fn transient(msg: impl Into<String>) -> Self {
        TransferError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        TransferError::Fatal(msg.into())
    }

    /// Scratch/archive I/O failures (disk full, permissions) are not retried.
    pub fn from_io(e: std::io::Error) -> Self {
        TransferError::Fatal(format!("storage: {}", e))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}
