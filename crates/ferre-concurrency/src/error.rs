//! # Concurrency Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   Concurrency Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Worker Pool    │  │   Job           │  │  Circuit Breaker        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  PoolFull       │  │  Failed         │  │  Open                   │ │
//! │  │  PoolNotRunning │  │  Panicked       │  │  Timeout                │ │
//! │  │  AlreadyRunning │  │                 │  │  Operation(E)           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pool operations.
pub type ConcurrencyResult<T> = Result<T, ConcurrencyError>;

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConcurrencyError {
    /// The job queue is at capacity. Backpressure: reject or retry later.
    #[error("Worker pool is full (queue capacity {capacity})")]
    PoolFull { capacity: usize },

    /// `submit` before `start` or after `stop`.
    #[error("Worker pool is not running")]
    PoolNotRunning,

    /// `start` on a pool that is already running.
    #[error("Worker pool is already running")]
    PoolAlreadyRunning,
}

impl ConcurrencyError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConcurrencyError::PoolFull { .. })
    }
}

/// Why a job did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The job returned an error.
    #[error("Job failed: {0}")]
    Failed(String),

    /// The job panicked. The worker survives.
    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}

/// Outcome of a call that went through a [`CircuitBreaker`](crate::CircuitBreaker).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the operation was not invoked.
    #[error("Circuit breaker '{name}' is open")]
    Open { name: String, retry_after: Duration },

    /// The operation did not finish within the breaker's call timeout.
    #[error("Circuit breaker '{name}' call timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// The operation ran and failed.
    #[error("Operation failed: {0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was rejected without running.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if it ran and failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}
