//! # RateLimiter
//!
//! ## Admission Flow
//! ```text
//! check(request)
//!   │
//!   ├─ disabled?                 ──► allow (no state touched)
//!   ├─ ip ∈ blacklist?           ──► deny  blacklisted
//!   ├─ ip ∈ whitelist?           ──► allow (no state touched)
//!   ├─ ip actively blocked?      ──► deny  temporarily_blocked + retry_after
//!   │
//!   ├─ resolve (limit, window, burst):  custom key limit → endpoint → default
//!   ├─ get-or-create limiter for LimiterKey (DashMap entry, one per key)
//!   └─ allow(1)?  yes ──► allow + quota
//!                 no  ──► record violation (may block ip) ──► deny rate_limited
//! ```
//!
//! Denials are values, not errors. The only fallible operations are
//! construction, reload and administrative limit changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ferre_concurrency::SafeCounter;
use ferre_core::{
    system_clock, AdmissionDecision, DenyReason, LimiterKey, NoopMetrics, Quota,
    RequestDescriptor, SharedClock, SharedMetrics,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::algorithm::{self, Acquired, SharedLimiter};
use crate::config::{Algorithm, ConfigHandle, LimitSpec, RateLimitConfig, MAX_DURATION_SECS};
use crate::error::{RateLimitError, RateLimitResult};
use crate::violations::{
    BlockEntry, BlockPolicy, Moment, ViolationRecord, ViolationSource, ViolationTracker,
};

// =============================================================================
// Supporting Types
// =============================================================================

#[derive(Debug)]
struct LimiterEntry {
    limiter: SharedLimiter,
    spec: LimitSpec,
    last_seen: Mutex<Instant>,
}

impl LimiterEntry {
    fn touch(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CustomLimit {
    limit: u32,
    burst: u32,
    window: Option<Duration>,
}

/// Limits and remaining quota for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitInfo {
    pub limit: u32,
    pub burst: u32,
    pub remaining: u32,
    pub window_secs: u64,
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimiterStats {
    pub total_requests: i64,
    pub allowed_requests: i64,
    pub denied_requests: i64,
    pub active_limiters: usize,
    pub custom_limits: usize,
    /// Stored block entries, including expired ones awaiting the sweep.
    pub blocked_ips: usize,
    pub tracked_violators: usize,
}

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_blocks: usize,
    pub expired_violations: usize,
    pub evicted_limiters: usize,
}

#[derive(Debug, Default)]
struct RequestCounters {
    total: SafeCounter,
    allowed: SafeCounter,
    denied: SafeCounter,
}

// =============================================================================
// RateLimiter
// =============================================================================

/// Per-request admission control shared by every request handler.
#[derive(Debug)]
pub struct RateLimiter {
    config: ConfigHandle,
    limiters: DashMap<LimiterKey, LimiterEntry>,
    custom_limits: DashMap<LimiterKey, CustomLimit>,
    violations: ViolationTracker,
    counters: RequestCounters,
    clock: SharedClock,
    metrics: SharedMetrics,
}

impl RateLimiter {
    /// Validates `config` and builds an empty limiter.
    pub fn new(config: RateLimitConfig) -> RateLimitResult<Self> {
        let config = ConfigHandle::new(config)?;
        let current = config.current();
        info!(
            enabled = current.enabled,
            algorithm = %current.algorithm,
            default_limit = current.default_limit,
            default_window_secs = current.default_window_secs,
            endpoint_overrides = current.endpoint_limits.len(),
            "Rate limiter initialized"
        );

        Ok(Self {
            config,
            limiters: DashMap::new(),
            custom_limits: DashMap::new(),
            violations: ViolationTracker::new(),
            counters: RequestCounters::default(),
            clock: system_clock(),
            metrics: NoopMetrics::shared(),
        })
    }

    /// Replaces the time source. Call before the first check.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The current config snapshot.
    pub fn config(&self) -> Arc<RateLimitConfig> {
        self.config.current()
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Decides whether `request` may proceed.
    pub fn check(&self, request: &RequestDescriptor) -> AdmissionDecision {
        let config = self.config.current();
        if !config.enabled {
            return AdmissionDecision::bypass();
        }

        self.counters.total.increment();

        if config.is_blacklisted(&request.ip) {
            debug!(ip = %request.ip, "Blacklisted IP rejected");
            return self.deny(request, DenyReason::Blacklisted, None, None);
        }

        if config.is_whitelisted(&request.ip) {
            self.counters.allowed.increment();
            return AdmissionDecision::bypass();
        }

        let now = self.clock.now();
        if let Some(remaining) = self.violations.blocked_for(&request.ip, now) {
            return self.deny(
                request,
                DenyReason::TemporarilyBlocked,
                None,
                Some(remaining),
            );
        }

        let key = request.limiter_key();
        let spec = self.resolve(&config, &key, request);
        self.admit(&config, key, spec, request)
    }

    /// Applies the user-type limit for an authenticated request.
    ///
    /// Returns `None` when the limiter is disabled, the request is anonymous,
    /// or its user type has no configured limit.
    pub fn check_user(&self, request: &RequestDescriptor) -> Option<AdmissionDecision> {
        let config = self.config.current();
        if !config.enabled {
            return None;
        }

        let user_id = request.user_id.as_deref().filter(|id| !id.is_empty())?;
        let user_type = request.user_type.as_deref()?;
        let user_limit = config.user_type_limits.get(user_type)?;

        self.counters.total.increment();
        let key = LimiterKey::for_user_type(user_type, user_id);
        let spec = self
            .custom_spec(&config, &key)
            .unwrap_or_else(|| user_limit.spec());
        Some(self.admit(&config, key, spec, request))
    }

    fn resolve(
        &self,
        config: &RateLimitConfig,
        key: &LimiterKey,
        request: &RequestDescriptor,
    ) -> LimitSpec {
        self.custom_spec(config, key)
            .unwrap_or_else(|| config.endpoint_spec(&request.endpoint_key()))
    }

    fn custom_spec(&self, config: &RateLimitConfig, key: &LimiterKey) -> Option<LimitSpec> {
        self.custom_limits
            .get(key)
            .map(|custom| {
                let window = custom.window.unwrap_or_else(|| config.default_window());
                LimitSpec::new(custom.limit, window, custom.burst)
            })
    }

    fn admit(
        &self,
        config: &RateLimitConfig,
        key: LimiterKey,
        spec: LimitSpec,
        request: &RequestDescriptor,
    ) -> AdmissionDecision {
        let now = self.clock.now();
        let (limiter, spec) = self.limiter_for(config.algorithm, &key, spec, now);

        let acquired = match limiter.acquire(1) {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(key = %key, error = %err, "Limiter rejected a request it should accept");
                Acquired {
                    allowed: false,
                    remaining: 0,
                    retry_after: spec.window,
                }
            }
        };

        self.metrics
            .record_rate_limit(key.as_str(), acquired.allowed, acquired.remaining);

        let quota = Quota {
            limit: spec.limit,
            remaining: acquired.remaining,
            reset_time: reset_time(self.clock.wall(), spec.window),
            window: spec.window,
        };

        if acquired.allowed {
            self.counters.allowed.increment();
            return AdmissionDecision::admitted(quota);
        }

        let retry_after = acquired.retry_after;
        self.record_violation(config, request);
        self.deny(
            request,
            DenyReason::RateLimited,
            Some(quota),
            Some(retry_after),
        )
    }

    /// One shared limiter per key, created under the map's entry lock.
    fn limiter_for(
        &self,
        algorithm: Algorithm,
        key: &LimiterKey,
        spec: LimitSpec,
        now: Instant,
    ) -> (SharedLimiter, LimitSpec) {
        if let Some(entry) = self.limiters.get(key) {
            entry.touch(now);
            return (Arc::clone(&entry.limiter), entry.spec);
        }

        let entry = self.limiters.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, limit = spec.limit, window_secs = spec.window.as_secs(), "Creating limiter");
            LimiterEntry {
                limiter: algorithm::build(algorithm, &spec, Arc::clone(&self.clock)),
                spec,
                last_seen: Mutex::new(now),
            }
        });
        entry.touch(now);
        (Arc::clone(&entry.limiter), entry.spec)
    }

    fn record_violation(&self, config: &RateLimitConfig, request: &RequestDescriptor) {
        let endpoint = request.endpoint_key();
        let record = self.violations.record(
            ViolationSource {
                ip: &request.ip,
                user_id: request.user_id.as_deref(),
                endpoint: &endpoint,
            },
            Moment {
                now: self.clock.now(),
                wall: self.clock.wall(),
            },
            BlockPolicy {
                enabled: config.block_on_violation,
                duration: config.block_duration(),
            },
        );

        if config.log_violations {
            warn!(
                ip = %record.ip,
                endpoint = %record.endpoint,
                user_id = ?record.user_id,
                violation_count = record.count,
                blocked = record.blocked,
                "Rate limit exceeded"
            );
        }
    }

    fn deny(
        &self,
        request: &RequestDescriptor,
        reason: DenyReason,
        quota: Option<Quota>,
        retry_after: Option<Duration>,
    ) -> AdmissionDecision {
        self.counters.denied.increment();
        self.metrics
            .record_business_error("rate_limit", reason.code());
        debug!(ip = %request.ip, path = %request.path, reason = %reason, "Request denied");
        AdmissionDecision::denied(reason, quota, retry_after)
    }

    // =========================================================================
    // Blocks and Violations
    // =========================================================================

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.violations
            .blocked_for(ip, self.clock.now())
            .is_some()
    }

    /// Lifts a block and forgets the IP's violations. Returns whether a
    /// block existed.
    pub fn unblock(&self, ip: &str) -> bool {
        let existed = self.violations.unblock(ip);
        if existed {
            info!(ip = %ip, "IP unblocked");
        }
        existed
    }

    pub fn violation(&self, ip: &str) -> Option<ViolationRecord> {
        self.violations.violation(ip)
    }

    /// Currently active blocks.
    pub fn blocked_ips(&self) -> Vec<BlockEntry> {
        self.violations.active_blocks(self.clock.now())
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Resets one key's limiter to its initial state. Returns whether the
    /// key had state.
    pub fn reset_key(&self, key: &LimiterKey) -> bool {
        match self.limiters.get(key) {
            Some(entry) => {
                entry.limiter.reset();
                true
            }
            None => false,
        }
    }

    /// Overrides the limit for one exact key. The key's current state is
    /// discarded so the next request picks up the new limit.
    ///
    /// The override counts over the configured default window, even when the
    /// key's endpoint has its own window. Use
    /// [`set_custom_limit_with_window`](Self::set_custom_limit_with_window)
    /// to pin one.
    pub fn set_custom_limit(&self, key: LimiterKey, limit: u32, burst: u32) -> RateLimitResult<()> {
        self.set_custom_limit_with_window(key, limit, burst, None)
    }

    /// Like [`set_custom_limit`](Self::set_custom_limit), counting over
    /// `window` when one is given.
    pub fn set_custom_limit_with_window(
        &self,
        key: LimiterKey,
        limit: u32,
        burst: u32,
        window: Option<Duration>,
    ) -> RateLimitResult<()> {
        if limit == 0 {
            return Err(RateLimitError::InvalidConfig(format!(
                "custom limit for '{}' must be positive",
                key
            )));
        }
        if let Some(window) = window {
            if window.is_zero() || window > Duration::from_secs(MAX_DURATION_SECS) {
                return Err(RateLimitError::InvalidConfig(format!(
                    "custom window for '{}' must be between 1 and {} seconds, got {:?}",
                    key, MAX_DURATION_SECS, window
                )));
            }
        }

        self.custom_limits
            .insert(key.clone(), CustomLimit { limit, burst, window });
        self.limiters.remove(&key);
        info!(
            key = %key,
            limit,
            burst,
            window_secs = window.map(|w| w.as_secs()),
            "Custom limit set"
        );
        Ok(())
    }

    /// Returns whether an override existed.
    pub fn remove_custom_limit(&self, key: &LimiterKey) -> bool {
        let existed = self.custom_limits.remove(key).is_some();
        if existed {
            self.limiters.remove(key);
            info!(key = %key, "Custom limit removed");
        }
        existed
    }

    /// Effective limits for `key` without creating state for it.
    pub fn get_limit_info(&self, key: &LimiterKey) -> LimitInfo {
        let config = self.config.current();

        if let Some(entry) = self.limiters.get(key) {
            return LimitInfo {
                limit: entry.spec.limit,
                burst: entry.spec.burst,
                remaining: entry.limiter.remaining(),
                window_secs: entry.spec.window.as_secs(),
            };
        }

        let spec = self
            .custom_spec(&config, key)
            .unwrap_or_else(|| config.default_spec());
        LimitInfo {
            limit: spec.limit,
            burst: spec.burst,
            remaining: initial_remaining(config.algorithm, &spec),
            window_secs: spec.window.as_secs(),
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.counters.total.get(),
            allowed_requests: self.counters.allowed.get(),
            denied_requests: self.counters.denied.get(),
            active_limiters: self.limiters.len(),
            custom_limits: self.custom_limits.len(),
            blocked_ips: self.violations.block_count(),
            tracked_violators: self.violations.violator_count(),
        }
    }

    /// Validates and swaps in `config`, then drops all limiter state so new
    /// limits apply. Custom limits, violations and blocks are kept.
    pub fn reload(&self, config: RateLimitConfig) -> RateLimitResult<()> {
        let previous = self.config.replace(config)?;
        let dropped = self.limiters.len();
        self.limiters.clear();

        let current = self.config.current();
        info!(
            previous_algorithm = %previous.algorithm,
            algorithm = %current.algorithm,
            dropped_limiters = dropped,
            "Rate limit config reloaded"
        );
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Removes expired blocks, stale violations and idle limiters.
    pub fn sweep(&self) -> SweepReport {
        let config = self.config.current();
        let now = self.clock.now();

        let (expired_blocks, expired_violations) =
            self.violations.cleanup(now, config.violation_ttl());

        let idle_ttl = config.limiter_idle_ttl();
        let mut evicted_limiters = 0;
        self.limiters.retain(|_, entry| {
            let keep = entry.idle_for(now) <= idle_ttl;
            if !keep {
                evicted_limiters += 1;
            }
            keep
        });

        let report = SweepReport {
            expired_blocks,
            expired_violations,
            evicted_limiters,
        };
        debug!(
            expired_blocks,
            expired_violations,
            evicted_limiters,
            active_limiters = self.limiters.len(),
            "Rate limit sweep finished"
        );
        report
    }
}

/// Remaining quota of a freshly created limiter.
fn initial_remaining(algorithm: Algorithm, spec: &LimitSpec) -> u32 {
    match algorithm {
        Algorithm::TokenBucket | Algorithm::LeakyBucket => spec.capacity(),
        Algorithm::SlidingWindow | Algorithm::FixedWindow => spec.limit,
    }
}

/// `wall + window`, saturating at the latest representable time.
fn reset_time(wall: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| wall.checked_add_signed(window))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ferre_core::{ManualClock, MetricsSink, VIOLATION_BLOCK_THRESHOLD};

    use super::*;
    use crate::config::{EndpointLimit, UserTypeLimit};

    #[derive(Debug, Default)]
    struct RecordingMetrics {
        decisions: Mutex<Vec<(String, bool, u32)>>,
        errors: Mutex<Vec<(String, String)>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn record_rate_limit(&self, key: &str, allowed: bool, remaining: u32) {
            self.decisions
                .lock()
                .push((key.to_string(), allowed, remaining));
        }

        fn record_business_error(&self, operation: &str, kind: &str) {
            self.errors
                .lock()
                .push((operation.to_string(), kind.to_string()));
        }
    }

    fn config(algorithm: Algorithm, limit: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            algorithm,
            default_limit: limit,
            default_window_secs: window_secs,
            burst_limit: 0,
            ..RateLimitConfig::default()
        }
    }

    fn limiter(config: RateLimitConfig) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::new(config).unwrap().with_clock(clock.clone());
        (clock, limiter)
    }

    fn get(ip: &str) -> RequestDescriptor {
        RequestDescriptor::new(ip, "GET", "/api/v1/products")
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = RateLimiter::new(config(Algorithm::TokenBucket, 0, 60)).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_disabled_allows_without_state() {
        let mut cfg = config(Algorithm::TokenBucket, 1, 60);
        cfg.enabled = false;
        let (_clock, limiter) = limiter(cfg);

        for _ in 0..10 {
            let decision = limiter.check(&get("10.0.0.1"));
            assert!(decision.is_allowed());
            assert!(decision.quota.is_none());
        }
        assert_eq!(limiter.stats().active_limiters, 0);
        assert_eq!(limiter.stats().total_requests, 0);
        assert!(limiter.check_user(&get("10.0.0.1").with_user("1", Some("admin"))).is_none());
    }

    #[test]
    fn test_token_bucket_admission() {
        let (clock, limiter) = limiter(config(Algorithm::TokenBucket, 5, 5));

        for _ in 0..5 {
            assert!(limiter.check(&get("10.0.0.1")).is_allowed());
        }
        let denied = limiter.check(&get("10.0.0.1"));
        assert!(!denied.is_allowed());
        assert_eq!(denied.reason, Some(DenyReason::RateLimited));
        assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
        assert_eq!(denied.quota.as_ref().map(|q| q.remaining), Some(0));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check(&get("10.0.0.1")).is_allowed());
        assert!(!limiter.check(&get("10.0.0.1")).is_allowed());
    }

    #[test]
    fn test_sliding_window_admission() {
        let (clock, limiter) = limiter(config(Algorithm::SlidingWindow, 3, 1));

        for _ in 0..3 {
            assert!(limiter.check(&get("10.0.0.1")).is_allowed());
        }
        assert!(!limiter.check(&get("10.0.0.1")).is_allowed());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check(&get("10.0.0.1")).is_allowed());
    }

    #[test]
    fn test_quota_reports_limit_and_remaining() {
        let (_clock, limiter) = limiter(config(Algorithm::FixedWindow, 10, 60));

        let decision = limiter.check(&get("10.0.0.1"));
        let quota = decision.quota.unwrap();
        assert_eq!(quota.limit, 10);
        assert_eq!(quota.remaining, 9);
        assert_eq!(quota.window, Duration::from_secs(60));
        assert!(decision.retry_after.is_none());
    }

    #[test]
    fn test_blacklist_overrides_whitelist() {
        let mut cfg = config(Algorithm::TokenBucket, 100, 60);
        cfg.whitelist_ips.insert("10.0.0.9".into());
        cfg.blacklist_ips.insert("10.0.0.9".into());
        let (_clock, limiter) = limiter(cfg);

        let decision = limiter.check(&get("10.0.0.9"));
        assert!(!decision.is_allowed());
        assert_eq!(decision.reason, Some(DenyReason::Blacklisted));
        assert!(decision.quota.is_none());
        assert_eq!(limiter.stats().active_limiters, 0);
    }

    #[test]
    fn test_whitelist_bypasses_limits() {
        let mut cfg = config(Algorithm::TokenBucket, 1, 60);
        cfg.whitelist_ips.insert("127.0.0.1".into());
        let (_clock, limiter) = limiter(cfg);

        for _ in 0..20 {
            assert!(limiter.check(&get("127.0.0.1")).is_allowed());
        }
        assert_eq!(limiter.stats().active_limiters, 0);
        assert_eq!(limiter.stats().allowed_requests, 20);
    }

    #[test]
    fn test_endpoint_override_applies() {
        let mut cfg = config(Algorithm::FixedWindow, 100, 60);
        cfg.endpoint_limits.insert(
            "POST /api/v1/auth/login".into(),
            EndpointLimit {
                limit: 2,
                window_secs: 60,
                burst: 0,
                require_auth: false,
            },
        );
        let (_clock, limiter) = limiter(cfg);
        let login = RequestDescriptor::new("10.0.0.1", "post", "/api/v1/auth/login");

        assert!(limiter.check(&login).is_allowed());
        assert!(limiter.check(&login).is_allowed());
        assert!(!limiter.check(&login).is_allowed());

        // other endpoints keep the default
        assert!(limiter.check(&get("10.0.0.1")).is_allowed());
    }

    #[test]
    fn test_principals_are_independent() {
        let (_clock, limiter) = limiter(config(Algorithm::FixedWindow, 1, 60));

        assert!(limiter.check(&get("10.0.0.1")).is_allowed());
        assert!(!limiter.check(&get("10.0.0.1")).is_allowed());
        assert!(limiter.check(&get("10.0.0.2")).is_allowed());

        // an authenticated user behind the same IP has their own key
        let user = get("10.0.0.1").with_user("42", Some("cajero"));
        assert!(limiter.check(&user).is_allowed());
        assert!(!limiter.check(&user).is_allowed());

        assert_eq!(limiter.stats().active_limiters, 3);
    }

    #[test]
    fn test_repeat_violators_are_blocked() {
        let mut cfg = config(Algorithm::FixedWindow, 1, 60);
        cfg.block_on_violation = true;
        cfg.block_duration_secs = 120;
        let (clock, limiter) = limiter(cfg);

        assert!(limiter.check(&get("10.0.0.1")).is_allowed());
        for _ in 0..VIOLATION_BLOCK_THRESHOLD {
            assert!(!limiter.check(&get("10.0.0.1")).is_allowed());
        }
        assert!(limiter.is_blocked("10.0.0.1"));
        assert!(!limiter.is_blocked("10.0.0.2"));
        assert!(limiter.check(&get("10.0.0.2")).is_allowed());

        let blocked = limiter.check(&get("10.0.0.1"));
        assert_eq!(blocked.reason, Some(DenyReason::TemporarilyBlocked));
        assert_eq!(blocked.retry_after, Some(Duration::from_secs(120)));
        assert_eq!(limiter.blocked_ips().len(), 1);

        clock.advance(Duration::from_secs(120));
        assert!(!limiter.is_blocked("10.0.0.1"));
        assert!(limiter.check(&get("10.0.0.1")).is_allowed());
    }

    #[test]
    fn test_year_long_block_holds() {
        let mut cfg = config(Algorithm::SlidingWindow, 1, 60);
        cfg.block_on_violation = true;
        cfg.block_duration_secs = MAX_DURATION_SECS;
        let (clock, limiter) = limiter(cfg);

        for _ in 0..=VIOLATION_BLOCK_THRESHOLD {
            limiter.check(&get("10.0.0.1"));
        }
        assert!(limiter.is_blocked("10.0.0.1"));

        let blocked = limiter.check(&get("10.0.0.1"));
        assert_eq!(blocked.reason, Some(DenyReason::TemporarilyBlocked));
        assert_eq!(
            blocked.retry_after,
            Some(Duration::from_secs(MAX_DURATION_SECS))
        );

        let entry = &limiter.blocked_ips()[0];
        assert_eq!(
            (entry.blocked_until - entry.blocked_at).num_seconds(),
            MAX_DURATION_SECS as i64
        );

        clock.advance(Duration::from_secs(30 * 24 * 60 * 60));
        assert!(limiter.is_blocked("10.0.0.1"));
        assert!(!limiter.check(&get("10.0.0.1")).is_allowed());
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let mut cfg = config(Algorithm::TokenBucket, 10, 10_000_000_000_000);
        assert!(RateLimiter::new(cfg.clone()).unwrap_err().is_config_error());

        cfg.default_window_secs = 60;
        cfg.block_duration_secs = u64::MAX;
        assert!(RateLimiter::new(cfg.clone()).unwrap_err().is_config_error());

        cfg.block_duration_secs = 900;
        let limiter = RateLimiter::new(cfg.clone()).unwrap();
        cfg.cleanup_interval_secs = u64::MAX;
        assert!(limiter.reload(cfg).unwrap_err().is_config_error());
    }

    #[test]
    fn test_no_block_without_block_on_violation() {
        let (_clock, limiter) = limiter(config(Algorithm::FixedWindow, 1, 60));

        for _ in 0..10 {
            limiter.check(&get("10.0.0.1"));
        }
        assert!(!limiter.is_blocked("10.0.0.1"));
        assert_eq!(limiter.violation("10.0.0.1").unwrap().count, 9);
    }

    #[test]
    fn test_unblock() {
        let mut cfg = config(Algorithm::FixedWindow, 1, 60);
        cfg.block_on_violation = true;
        let (_clock, limiter) = limiter(cfg);

        for _ in 0..=VIOLATION_BLOCK_THRESHOLD {
            limiter.check(&get("10.0.0.1"));
        }
        assert!(limiter.is_blocked("10.0.0.1"));
        assert!(limiter.unblock("10.0.0.1"));
        assert!(!limiter.is_blocked("10.0.0.1"));
        assert!(limiter.violation("10.0.0.1").is_none());
    }

    #[test]
    fn test_custom_limits() {
        let (_clock, limiter) = limiter(config(Algorithm::FixedWindow, 100, 60));
        let request = get("10.0.0.1");
        let key = request.limiter_key();

        assert!(limiter.check(&request).is_allowed());
        limiter.set_custom_limit(key.clone(), 1, 0).unwrap();
        assert_eq!(limiter.stats().active_limiters, 0);

        let info = limiter.get_limit_info(&key);
        assert_eq!((info.limit, info.remaining, info.window_secs), (1, 1, 60));
        assert_eq!(limiter.stats().active_limiters, 0);

        assert!(limiter.check(&request).is_allowed());
        assert!(!limiter.check(&request).is_allowed());
        assert_eq!(limiter.get_limit_info(&key).remaining, 0);

        assert!(limiter.remove_custom_limit(&key));
        assert!(!limiter.remove_custom_limit(&key));
        assert!(limiter.check(&request).is_allowed());
        assert_eq!(limiter.get_limit_info(&key).limit, 100);

        assert!(limiter.set_custom_limit(key, 0, 0).is_err());
    }

    #[test]
    fn test_custom_limit_window() {
        let mut cfg = config(Algorithm::FixedWindow, 100, 60);
        cfg.endpoint_limits.insert(
            "GET /api/v1/products".into(),
            EndpointLimit {
                limit: 50,
                window_secs: 600,
                burst: 0,
                require_auth: false,
            },
        );
        let (clock, limiter) = limiter(cfg);
        let request = get("10.0.0.1");
        let key = request.limiter_key();

        limiter.set_custom_limit(key.clone(), 1, 0).unwrap();
        assert_eq!(limiter.get_limit_info(&key).window_secs, 60);

        limiter
            .set_custom_limit_with_window(key.clone(), 1, 0, Some(Duration::from_secs(3600)))
            .unwrap();
        assert_eq!(limiter.get_limit_info(&key).window_secs, 3600);

        assert!(limiter.check(&request).is_allowed());
        clock.advance(Duration::from_secs(600));
        let denied = limiter.check(&request);
        assert!(!denied.is_allowed());
        assert_eq!(denied.quota.map(|q| q.window), Some(Duration::from_secs(3600)));

        for window in [Duration::ZERO, Duration::from_secs(MAX_DURATION_SECS + 1)] {
            let err = limiter
                .set_custom_limit_with_window(key.clone(), 1, 0, Some(window))
                .unwrap_err();
            assert!(err.is_config_error());
        }
    }

    #[test]
    fn test_limit_info_for_unknown_key_uses_default() {
        let mut cfg = config(Algorithm::TokenBucket, 100, 60);
        cfg.burst_limit = 10;
        let (_clock, limiter) = limiter(cfg);

        let info = limiter.get_limit_info(&LimiterKey::from_raw("ip:10.0.0.1:GET:/"));
        assert_eq!(info.limit, 100);
        assert_eq!(info.burst, 10);
        assert_eq!(info.remaining, 10);
        assert_eq!(limiter.stats().active_limiters, 0);
    }

    #[test]
    fn test_check_user_applies_user_type_limit() {
        let mut cfg = config(Algorithm::FixedWindow, 100, 60);
        cfg.user_type_limits = HashMap::from([(
            "cajero".to_string(),
            UserTypeLimit {
                limit: 1,
                window_secs: 60,
                burst: 0,
                multiplier: 2.0,
            },
        )]);
        let (_clock, limiter) = limiter(cfg);

        let anonymous = get("10.0.0.1");
        assert!(limiter.check_user(&anonymous).is_none());

        let admin = get("10.0.0.1").with_user("7", Some("admin"));
        assert!(limiter.check_user(&admin).is_none());

        let cashier = get("10.0.0.1").with_user("42", Some("cajero"));
        let first = limiter.check_user(&cashier).unwrap();
        assert_eq!(first.quota.as_ref().map(|q| q.limit), Some(2));
        assert!(first.is_allowed());
        assert!(limiter.check_user(&cashier).unwrap().is_allowed());

        let denied = limiter.check_user(&cashier).unwrap();
        assert_eq!(denied.reason, Some(DenyReason::RateLimited));
        assert_eq!(limiter.violation("10.0.0.1").unwrap().user_id.as_deref(), Some("42"));

        let info = limiter.get_limit_info(&LimiterKey::for_user_type("cajero", "42"));
        assert_eq!(info.remaining, 0);
    }

    #[test]
    fn test_reload_clears_limiters_but_keeps_blocks() {
        let mut cfg = config(Algorithm::FixedWindow, 1, 60);
        cfg.block_on_violation = true;
        let (_clock, limiter) = limiter(cfg.clone());

        for _ in 0..=VIOLATION_BLOCK_THRESHOLD {
            limiter.check(&get("10.0.0.1"));
        }
        assert!(limiter.check(&get("10.0.0.2")).is_allowed());
        assert!(limiter.is_blocked("10.0.0.1"));

        cfg.default_limit = 5;
        cfg.algorithm = Algorithm::SlidingWindow;
        limiter.reload(cfg).unwrap();

        assert_eq!(limiter.stats().active_limiters, 0);
        assert_eq!(limiter.config().algorithm, Algorithm::SlidingWindow);
        assert!(limiter.is_blocked("10.0.0.1"));
        assert_eq!(
            limiter.check(&get("10.0.0.2")).quota.map(|q| q.limit),
            Some(5)
        );

        let mut invalid = RateLimitConfig::default();
        invalid.default_window_secs = 0;
        assert!(limiter.reload(invalid).is_err());
        assert_eq!(limiter.config().default_limit, 5);
    }

    #[test]
    fn test_sweep_evicts_idle_state() {
        let mut cfg = config(Algorithm::TokenBucket, 10, 6000);
        cfg.limiter_idle_ttl_secs = 600;
        cfg.violation_ttl_secs = 3600;
        let (clock, limiter) = limiter(cfg);

        limiter.check(&get("10.0.0.1"));
        clock.advance(Duration::from_secs(300));
        limiter.check(&get("10.0.0.2"));
        assert_eq!(limiter.sweep(), SweepReport::default());

        clock.advance(Duration::from_secs(301));
        let report = limiter.sweep();
        assert_eq!(report.evicted_limiters, 1);
        assert_eq!(limiter.stats().active_limiters, 1);
        assert_eq!(limiter.get_limit_info(&get("10.0.0.2").limiter_key()).remaining, 9);
    }

    #[test]
    fn test_sweep_removes_expired_blocks_and_violations() {
        let mut cfg = config(Algorithm::FixedWindow, 1, 60);
        cfg.block_on_violation = true;
        cfg.block_duration_secs = 60;
        cfg.violation_ttl_secs = 3600;
        let (clock, limiter) = limiter(cfg);

        for _ in 0..=VIOLATION_BLOCK_THRESHOLD {
            limiter.check(&get("10.0.0.1"));
        }
        assert_eq!(limiter.stats().blocked_ips, 1);

        clock.advance(Duration::from_secs(61));
        let report = limiter.sweep();
        assert_eq!(report.expired_blocks, 1);
        assert_eq!(report.expired_violations, 0);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(limiter.sweep().expired_violations, 1);
        assert_eq!(limiter.stats().tracked_violators, 0);
    }

    #[test]
    fn test_reset_key() {
        let (_clock, limiter) = limiter(config(Algorithm::LeakyBucket, 2, 60));
        let request = get("10.0.0.1");

        assert!(limiter.check(&request).is_allowed());
        assert!(limiter.check(&request).is_allowed());
        assert!(!limiter.check(&request).is_allowed());

        assert!(limiter.reset_key(&request.limiter_key()));
        assert!(limiter.check(&request).is_allowed());
        assert!(!limiter.reset_key(&get("10.0.0.2").limiter_key()));
    }

    #[test]
    fn test_stats_and_metrics() {
        let metrics = Arc::new(RecordingMetrics::default());
        let mut cfg = config(Algorithm::FixedWindow, 1, 60);
        cfg.blacklist_ips.insert("10.0.0.66".into());
        let limiter = RateLimiter::new(cfg)
            .unwrap()
            .with_clock(Arc::new(ManualClock::new()))
            .with_metrics(metrics.clone());

        limiter.check(&get("10.0.0.1"));
        limiter.check(&get("10.0.0.1"));
        limiter.check(&get("10.0.0.66"));

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.allowed_requests, 1);
        assert_eq!(stats.denied_requests, 2);
        assert_eq!(stats.tracked_violators, 1);

        let decisions = metrics.decisions.lock();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0], ("ip:10.0.0.1:GET:/api/v1/products".to_string(), true, 0));
        assert!(!decisions[1].1);

        let errors = metrics.errors.lock();
        assert!(errors.contains(&("rate_limit".to_string(), "rate_limited".to_string())));
        assert!(errors.contains(&("rate_limit".to_string(), "blacklisted".to_string())));
    }

    #[test]
    fn test_concurrent_checks_share_one_limiter() {
        let (_clock, limiter) = limiter(config(Algorithm::FixedWindow, 100, 60));
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| limiter.check(&get("10.0.0.1")).is_allowed())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(limiter.stats().active_limiters, 1);
    }
}
