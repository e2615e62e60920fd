//! Sliding window log: admit while fewer than `limit` admissions happened in
//! the trailing window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ferre_core::SharedClock;
use parking_lot::Mutex;
use serde_json::json;

use super::{check_tokens, clamp_to, Acquired, AlgorithmLimiter, LimiterStats};
use crate::error::RateLimitResult;

#[derive(Debug)]
pub struct SlidingWindow {
    limit: u32,
    window: Duration,
    clock: SharedClock,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration, clock: SharedClock) -> Self {
        Self {
            limit,
            window,
            clock,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_for_slot(&self, admitted: &VecDeque<Instant>, now: Instant) -> Duration {
        if (admitted.len() as u64) < u64::from(self.limit) {
            return Duration::ZERO;
        }
        match admitted.front() {
            Some(&oldest) => self
                .window
                .saturating_sub(now.saturating_duration_since(oldest)),
            None => self.window,
        }
    }

    fn remaining_in(&self, admitted: &mut VecDeque<Instant>) -> u32 {
        let mut count = u32::try_from(admitted.len()).unwrap_or(u32::MAX);
        clamp_to("sliding_window", &mut count, self.limit);
        // drop the oldest entries if the log ever outgrew the limit
        while admitted.len() > count as usize {
            admitted.pop_front();
        }
        self.limit - count
    }
}

impl AlgorithmLimiter for SlidingWindow {
    fn acquire(&self, tokens: u32) -> RateLimitResult<Acquired> {
        check_tokens(tokens)?;

        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);

        let allowed = admitted.len() as u64 + u64::from(tokens) <= u64::from(self.limit);
        if allowed {
            admitted.extend(std::iter::repeat(now).take(tokens as usize));
        }
        Ok(Acquired {
            allowed,
            remaining: self.remaining_in(&mut admitted),
            retry_after: self.wait_for_slot(&admitted, now),
        })
    }

    fn remaining(&self) -> u32 {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);
        self.remaining_in(&mut admitted)
    }

    fn reset(&self) {
        self.admitted.lock().clear();
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);
        self.wait_for_slot(&admitted, now)
    }

    fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, now);

        let mut stats = LimiterStats::new();
        stats.insert("algorithm", json!("sliding_window"));
        stats.insert("limit", json!(self.limit));
        stats.insert("window_secs", json!(self.window.as_secs()));
        stats.insert("in_window", json!(admitted.len()));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferre_core::ManualClock;
    use std::sync::Arc;

    fn window(limit: u32, secs: u64) -> (Arc<ManualClock>, SlidingWindow) {
        let clock = Arc::new(ManualClock::new());
        let limiter = SlidingWindow::new(limit, Duration::from_secs(secs), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_admits_up_to_limit() {
        let (_clock, limiter) = window(3, 1);
        assert!(limiter.allow(1).unwrap());
        assert!(limiter.allow(1).unwrap());
        assert!(limiter.allow(1).unwrap());
        assert!(!limiter.allow(1).unwrap());
        assert_eq!(limiter.remaining(), 0);
    }

    #[test]
    fn test_entries_expire_after_full_window() {
        let (clock, limiter) = window(3, 1);
        for _ in 0..3 {
            assert!(limiter.allow(1).unwrap());
        }

        clock.advance(Duration::from_millis(999));
        assert!(!limiter.allow(1).unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(limiter.allow(1).unwrap());
    }

    #[test]
    fn test_window_slides_per_entry() {
        let (clock, limiter) = window(2, 10);
        assert!(limiter.allow(1).unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(limiter.allow(1).unwrap());
        assert!(!limiter.allow(1).unwrap());

        assert_eq!(limiter.retry_after(), Duration::from_secs(5));

        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.remaining(), 1);
        assert!(limiter.allow(1).unwrap());
        assert!(!limiter.allow(1).unwrap());
    }

    #[test]
    fn test_multi_token_requests() {
        let (_clock, limiter) = window(5, 60);
        assert!(limiter.allow(3).unwrap());
        assert!(!limiter.allow(3).unwrap());
        assert!(limiter.allow(2).unwrap());
    }

    #[test]
    fn test_reset_clears_log() {
        let (_clock, limiter) = window(1, 60);
        assert!(limiter.allow(1).unwrap());
        limiter.reset();
        assert_eq!(limiter.remaining(), 1);
        assert_eq!(limiter.stats()["in_window"], 0);
    }
}
