//! Fixed window counter. The window restarts at the first request after it
//! has fully elapsed.

use std::time::{Duration, Instant};

use ferre_core::SharedClock;
use parking_lot::Mutex;
use serde_json::json;

use super::{check_tokens, clamp_to, Acquired, AlgorithmLimiter, LimiterStats};
use crate::error::RateLimitResult;

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
pub struct FixedWindow {
    limit: u32,
    window: Duration,
    clock: SharedClock,
    state: Mutex<WindowState>,
}

impl FixedWindow {
    pub fn new(limit: u32, window: Duration, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            limit,
            window,
            clock,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: now,
            }),
        }
    }

    fn roll(&self, state: &mut WindowState, now: Instant) {
        if now.saturating_duration_since(state.window_start) >= self.window {
            state.count = 0;
            state.window_start = now;
        }
    }

    fn wait_for_window(&self, state: &WindowState, now: Instant) -> Duration {
        if state.count < self.limit {
            return Duration::ZERO;
        }
        self.window
            .saturating_sub(now.saturating_duration_since(state.window_start))
    }
}

impl AlgorithmLimiter for FixedWindow {
    fn acquire(&self, tokens: u32) -> RateLimitResult<Acquired> {
        check_tokens(tokens)?;

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        let allowed = u64::from(state.count) + u64::from(tokens) <= u64::from(self.limit);
        if allowed {
            state.count += tokens;
        }
        clamp_to("fixed_window", &mut state.count, self.limit);
        Ok(Acquired {
            allowed,
            remaining: self.limit - state.count,
            retry_after: self.wait_for_window(&state, now),
        })
    }

    fn remaining(&self) -> u32 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll(&mut state, now);
        self.limit.saturating_sub(state.count)
    }

    fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.count = 0;
        state.window_start = now;
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll(&mut state, now);
        self.wait_for_window(&state, now)
    }

    fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        let mut stats = LimiterStats::new();
        stats.insert("algorithm", json!("fixed_window"));
        stats.insert("limit", json!(self.limit));
        stats.insert("window_secs", json!(self.window.as_secs()));
        stats.insert("count", json!(state.count));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferre_core::ManualClock;
    use std::sync::Arc;

    fn window(limit: u32, secs: u64) -> (Arc<ManualClock>, FixedWindow) {
        let clock = Arc::new(ManualClock::new());
        let limiter = FixedWindow::new(limit, Duration::from_secs(secs), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_counts_within_window() {
        let (_clock, limiter) = window(2, 60);
        assert!(limiter.allow(1).unwrap());
        assert!(limiter.allow(1).unwrap());
        assert!(!limiter.allow(1).unwrap());
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let (clock, limiter) = window(2, 60);
        assert!(limiter.allow(2).unwrap());

        clock.advance(Duration::from_secs(59));
        assert!(!limiter.allow(1).unwrap());
        assert_eq!(limiter.retry_after(), Duration::from_secs(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(limiter.remaining(), 2);
        assert!(limiter.allow(1).unwrap());
    }

    #[test]
    fn test_exact_fit_is_admitted() {
        let (_clock, limiter) = window(3, 60);
        assert!(limiter.allow(2).unwrap());
        assert!(limiter.allow(1).unwrap());
        assert!(!limiter.allow(1).unwrap());
    }

    #[test]
    fn test_reset() {
        let (_clock, limiter) = window(1, 60);
        assert!(limiter.allow(1).unwrap());
        limiter.reset();
        assert!(limiter.allow(1).unwrap());
        assert_eq!(limiter.stats()["count"], 1);
    }
}
