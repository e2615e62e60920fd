//! Token bucket: starts full, one token back per interval, never above
//! capacity.

use std::time::{Duration, Instant};

use ferre_core::SharedClock;
use parking_lot::Mutex;
use serde_json::json;

use super::{
    check_tokens, clamp_to, times, whole_intervals, Acquired, AlgorithmLimiter, LimiterStats,
};
use crate::error::RateLimitResult;

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    limit: u32,
    refill_interval: Duration,
    clock: SharedClock,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, limit: u32, refill_interval: Duration, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            capacity,
            limit,
            refill_interval,
            clock,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    /// Adds whole elapsed intervals worth of tokens. Partial intervals carry
    /// over because `last_refill` only advances by whole intervals.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let intervals = whole_intervals(elapsed, self.refill_interval);
        if intervals == 0 {
            return;
        }

        let refilled = u128::from(state.tokens).saturating_add(intervals);
        if refilled >= u128::from(self.capacity) {
            state.tokens = self.capacity;
            state.last_refill = now;
        } else {
            state.tokens = refilled as u32;
            state.last_refill += times(self.refill_interval, intervals);
        }
        clamp_to("token_bucket", &mut state.tokens, self.capacity);
    }

    fn wait_for_token(&self, state: &BucketState, now: Instant) -> Duration {
        if state.tokens > 0 {
            return Duration::ZERO;
        }
        let since = now.saturating_duration_since(state.last_refill);
        self.refill_interval.saturating_sub(since)
    }
}

impl AlgorithmLimiter for TokenBucket {
    fn acquire(&self, tokens: u32) -> RateLimitResult<Acquired> {
        check_tokens(tokens)?;

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        let allowed = self.capacity > 0 && state.tokens >= tokens;
        if allowed {
            state.tokens -= tokens;
        }
        Ok(Acquired {
            allowed,
            remaining: state.tokens,
            retry_after: self.wait_for_token(&state, now),
        })
    }

    fn remaining(&self) -> u32 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.tokens = self.capacity;
        state.last_refill = now;
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn retry_after(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        self.wait_for_token(&state, now)
    }

    fn stats(&self) -> LimiterStats {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        let mut stats = LimiterStats::new();
        stats.insert("algorithm", json!("token_bucket"));
        stats.insert("capacity", json!(self.capacity));
        stats.insert("limit", json!(self.limit));
        stats.insert("tokens", json!(state.tokens));
        stats.insert(
            "refill_interval_ms",
            json!(self.refill_interval.as_millis() as u64),
        );
        stats
    }
}
