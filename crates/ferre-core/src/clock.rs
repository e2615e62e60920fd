//! # Clock
//!
//! Injectable time source. Every component that reasons about elapsed time
//! (refill, leak, windows, blocks, breaker timers) reads it through a
//! [`SharedClock`] so tests can drive time by hand.
//!
//! - [`SystemClock`] - the real monotonic and wall clocks
//! - [`ManualClock`] - frozen until [`ManualClock::advance`] is called

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic now, for measuring elapsed time.
    fn now(&self) -> Instant;

    /// Wall-clock now, for timestamps shown to clients.
    fn wall(&self) -> DateTime<Utc>;
}

/// Clock shared between components.
pub type SharedClock = Arc<dyn Clock>;

/// The process clock, boxed for sharing.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

// =============================================================================
// System Clock
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// Manual Clock
// =============================================================================

/// A clock that only moves when told to.
///
/// Both readings advance together, so wall-clock reset times stay consistent
/// with monotonic elapsed time.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use ferre_core::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now() - start, Duration::from_secs(5));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    /// Moves both readings forward by `by`.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Total time advanced since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        let nanos = i64::try_from(self.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.wall_origin + chrono::Duration::nanoseconds(nanos)
    }
}
