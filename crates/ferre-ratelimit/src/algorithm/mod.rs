//! # Admission Algorithms
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    AlgorithmLimiter implementations                     │
//! │                                                                         │
//! │  TokenBucket     capacity = burst or limit, +1 token per interval      │
//! │  SlidingWindow   at most `limit` timestamps inside the last window     │
//! │  FixedWindow     at most `limit` per window, window resets wholesale   │
//! │  LeakyBucket     level drains 1 per interval, capacity = burst or limit│
//! │                                                                         │
//! │  interval = window / limit                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every limiter serializes its own state behind a `parking_lot::Mutex`, so a
//! decision on one key never waits on another key.

mod fixed_window;
mod leaky_bucket;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ferre_core::SharedClock;
use tracing::warn;

use crate::config::{Algorithm, LimitSpec};
use crate::error::{RateLimitError, RateLimitResult};

/// Statistics snapshot of a single limiter, keyed by field name.
pub type LimiterStats = BTreeMap<&'static str, serde_json::Value>;

/// Outcome of one [`AlgorithmLimiter::acquire`], read under the same lock
/// that made the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub allowed: bool,
    pub remaining: u32,
    /// Zero when another single-token request would be admitted now.
    pub retry_after: Duration,
}

/// One admission policy guarding one limiter key.
pub trait AlgorithmLimiter: Send + Sync + fmt::Debug {
    /// Consumes `tokens` if they fit and reports the resulting quota.
    fn acquire(&self, tokens: u32) -> RateLimitResult<Acquired>;

    /// Consumes `tokens` if they fit. `Ok(false)` means "over limit".
    fn allow(&self, tokens: u32) -> RateLimitResult<bool> {
        self.acquire(tokens).map(|acquired| acquired.allowed)
    }

    /// How many single-token requests would be admitted right now.
    fn remaining(&self) -> u32;

    /// Back to the initial state.
    fn reset(&self);

    /// The configured limit (requests per window).
    fn limit(&self) -> u32;

    /// Time until the next single-token request would be admitted.
    fn retry_after(&self) -> Duration;

    fn stats(&self) -> LimiterStats;
}

/// Shared, type-erased limiter.
pub type SharedLimiter = Arc<dyn AlgorithmLimiter>;

/// Builds the limiter for `algorithm` with the given limits.
pub fn build(algorithm: Algorithm, spec: &LimitSpec, clock: SharedClock) -> SharedLimiter {
    match algorithm {
        Algorithm::TokenBucket => Arc::new(TokenBucket::new(
            spec.capacity(),
            spec.limit,
            spec.interval(),
            clock,
        )),
        Algorithm::SlidingWindow => Arc::new(SlidingWindow::new(spec.limit, spec.window, clock)),
        Algorithm::FixedWindow => Arc::new(FixedWindow::new(spec.limit, spec.window, clock)),
        Algorithm::LeakyBucket => Arc::new(LeakyBucket::new(
            spec.capacity(),
            spec.limit,
            spec.interval(),
            clock,
        )),
    }
}

pub(crate) fn check_tokens(tokens: u32) -> RateLimitResult<()> {
    if tokens == 0 {
        return Err(RateLimitError::InvalidTokenCount);
    }
    Ok(())
}

/// Pulls `value` back to `max` if an update overshot it. Debug builds treat
/// the overshoot as a bug; release builds log and clamp.
pub(crate) fn clamp_to(algorithm: &'static str, value: &mut u32, max: u32) {
    debug_assert!(*value <= max, "{} state {} above {}", algorithm, *value, max);
    if *value > max {
        warn!(algorithm, value = *value, max, "Limiter state above capacity, clamping");
        *value = max;
    }
}

/// How many whole `interval`s fit in `elapsed`.
pub(crate) fn whole_intervals(elapsed: Duration, interval: Duration) -> u128 {
    if interval.is_zero() {
        return 0;
    }
    elapsed.as_nanos() / interval.as_nanos()
}

/// `interval × n`, saturating.
pub(crate) fn times(interval: Duration, n: u128) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(n);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
