//! Leaky bucket: each admission adds to the level, which drains by one per
//! interval. Admit while the level stays within capacity.

use std::time::{Duration, Instant};

use ferre_core::SharedClock;
use parking_lot::Mutex;
use serde_json::json;

use super::{
    check_tokens, clamp_to, times, whole_intervals, Acquired, AlgorithmLimiter, LimiterStats,
};
use crate::error::RateLimitResult;

#[derive(Debug)]
struct LeakState {
    level: u32,
    last_leak: Instant,
}

#[derive(Debug)]
pub struct LeakyBucket {
    capacity: u32,
    limit: u32,
    leak_interval: Duration,
    clock: SharedClock,
    state: Mutex<LeakState>,
}

impl LeakyBucket {
    pub fn new(capacity: u32, limit: u32, leak_interval: Duration, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            capacity,
            limit,
            leak_interval,
            clock,
            state: Mutex::new(LeakState {
                level: 0,
                last_leak: now,
            }),
        }
    }

    fn leak(&self, state: &mut LeakState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_leak);
        let intervals = whole_intervals(elapsed, self.leak_interval);
        if intervals == 0 {
            return;
        }

        if intervals >= u128::from(state.level) {
            state.level = 0;
            state.last_leak = now;
        } else {
            state.level -= intervals as u32;
            state.last_leak += times(self.leak_interval, intervals);
        }
    }

    fn wait_for_drain(&self, state: &LeakState, now: Instant) -> Duration {
        if state.level < self.capacity {
            return Duration::ZERO;
        }
        let since = now.saturating_duration_since(state.last_leak);
        self.leak_interval.saturating_sub(since)
    }
}

impl AlgorithmLimiter for LeakyBucket {
    fn acquire(&self, tokens: u32) -> RateLimitResult<Acquired> {
        check_tokens(tokens)?;

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.leak(&mut state, now);

        let allowed = u64::from(state.level) + u64::from(tokens) <= u64::from(self.capacity);
        if allowed {
            state.level += tokens;
        }
        clamp_to("leaky_bucket", &mut state.level, self.capacity);
        Ok(Acquired {
            allowed,
            remaining: self.capacity - state.level,
            retry_after: self.wait_for_drain(&state, now),
        })
    }

    fn remaining(&self) -> u32 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.leak(&mut state, now);
        self.capacity.saturating_sub(state.level)
    }

    fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.level = 0;
        state.last_leak = now;
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.leak(&mut state, now);
        self.wait_for_drain(&state, now)
    }

    fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.leak(&mut state, now);

        let mut stats = LimiterStats::new();
        stats.insert("algorithm", json!("leaky_bucket"));
        stats.insert("capacity", json!(self.capacity));
        stats.insert("limit", json!(self.limit));
        stats.insert("level", json!(state.level));
        stats.insert("leak_interval_ms", json!(self.leak_interval.as_millis() as u64));
        stats
    }
}
