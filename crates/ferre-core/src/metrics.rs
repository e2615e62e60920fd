//! # Metrics Seam
//!
//! Components report counts and durations through [`MetricsSink`]. Calls
//! are fire-and-forget: a sink must not block and must not fail the
//! operation that reported to it. Storage and export live outside this
//! workspace.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Receiver for admission and reliability metrics.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// One rate-limit decision for `key`.
    fn record_rate_limit(&self, key: &str, allowed: bool, remaining: u32);

    /// A business-level failure, e.g. `("inventory-api", "circuit_open")`.
    fn record_business_error(&self, operation: &str, kind: &str);

    /// How long an operation took.
    fn record_duration(&self, _operation: &str, _elapsed: Duration) {}
}

/// Sink shared between components.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl NoopMetrics {
    pub fn shared() -> SharedMetrics {
        Arc::new(NoopMetrics)
    }
}

impl MetricsSink for NoopMetrics {
    #[inline]
    fn record_rate_limit(&self, _key: &str, _allowed: bool, _remaining: u32) {}

    #[inline]
    fn record_business_error(&self, _operation: &str, _kind: &str) {}
}
