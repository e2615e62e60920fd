//! # Violation and Block Bookkeeping
//!
//! ```text
//! denied request ──► record(ip) ──► count += 1 ──► count ≥ 5 && block_on_violation?
//!                                                         │ yes
//!                                                         ▼
//!                                               BlockEntry { until = now + block }
//! ```
//!
//! Both maps are keyed by IP. Each read-modify-write happens under one
//! [`SafeMap::upsert`], so concurrent violations for the same IP are all
//! counted.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ferre_concurrency::SafeMap;
use serde::Serialize;
use tracing::{error, warn};

use crate::config::MAX_DURATION_SECS;

/// Violations from one IP before it is blocked.
pub use ferre_core::VIOLATION_BLOCK_THRESHOLD;

/// Denied admissions attributed to one IP.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub ip: String,
    pub user_id: Option<String>,
    /// `"METHOD /path"` of the most recent violation.
    pub endpoint: String,
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) last_seen_at: Instant,
    pub blocked: bool,
}

/// A temporary block on one IP.
#[derive(Debug, Clone, Serialize)]
pub struct BlockEntry {
    pub ip: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) until: Instant,
}

impl BlockEntry {
    /// Active while `now < until`.
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.until
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.until.saturating_duration_since(now)
    }
}

/// Where a violation came from.
#[derive(Debug, Clone, Copy)]
pub struct ViolationSource<'a> {
    pub ip: &'a str,
    pub user_id: Option<&'a str>,
    pub endpoint: &'a str,
}

/// Timestamps for one bookkeeping step.
#[derive(Debug, Clone, Copy)]
pub struct Moment {
    pub now: Instant,
    pub wall: DateTime<Utc>,
}

/// Blocking policy in effect when a violation is recorded.
#[derive(Debug, Clone, Copy)]
pub struct BlockPolicy {
    pub enabled: bool,
    pub duration: Duration,
}

#[derive(Debug, Default)]
pub struct ViolationTracker {
    violations: SafeMap<String, ViolationRecord>,
    blocks: SafeMap<String, BlockEntry>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one violation. Returns the updated record, with `blocked` set
    /// when this call created or extended a block.
    pub fn record(
        &self,
        source: ViolationSource<'_>,
        at: Moment,
        policy: BlockPolicy,
    ) -> ViolationRecord {
        let record = self.violations.upsert(
            source.ip.to_string(),
            || ViolationRecord {
                ip: source.ip.to_string(),
                user_id: None,
                endpoint: String::new(),
                count: 0,
                first_seen: at.wall,
                last_seen: at.wall,
                last_seen_at: at.now,
                blocked: false,
            },
            |record| {
                record.count = record.count.saturating_add(1);
                record.last_seen = at.wall;
                record.last_seen_at = at.now;
                record.endpoint = source.endpoint.to_string();
                if let Some(user_id) = source.user_id {
                    record.user_id = Some(user_id.to_string());
                }
                if policy.enabled && record.count >= VIOLATION_BLOCK_THRESHOLD {
                    record.blocked = true;
                }
                record.clone()
            },
        );

        if policy.enabled && record.count >= VIOLATION_BLOCK_THRESHOLD {
            self.block(source.ip, at, policy.duration);
        }

        record
    }

    /// Blocks `ip` until `at + duration`, replacing any existing block.
    ///
    /// `duration` is capped at [`MAX_DURATION_SECS`].
    pub fn block(&self, ip: &str, at: Moment, duration: Duration) {
        let duration = duration.min(Duration::from_secs(MAX_DURATION_SECS));
        let until = at.now.checked_add(duration);
        let blocked_until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|span| at.wall.checked_add_signed(span));

        let (Some(until), Some(blocked_until)) = (until, blocked_until) else {
            error!(ip = %ip, duration_secs = duration.as_secs(), "Block end is not representable, IP not blocked");
            return;
        };

        self.blocks.set(
            ip.to_string(),
            BlockEntry {
                ip: ip.to_string(),
                blocked_at: at.wall,
                blocked_until,
                until,
            },
        );
        warn!(ip = %ip, duration_secs = duration.as_secs(), "IP temporarily blocked");
    }

    /// Remaining block time for `ip`, if it is actively blocked.
    pub fn blocked_for(&self, ip: &str, now: Instant) -> Option<Duration> {
        self.blocks
            .get(ip)
            .filter(|entry| entry.is_active(now))
            .map(|entry| entry.remaining(now))
    }

    /// Removes the block and violation history for `ip`. Returns whether a
    /// block existed.
    pub fn unblock(&self, ip: &str) -> bool {
        self.violations.delete(ip);
        self.blocks.delete(ip).is_some()
    }

    pub fn violation(&self, ip: &str) -> Option<ViolationRecord> {
        self.violations.get(ip)
    }

    /// Currently active blocks.
    pub fn active_blocks(&self, now: Instant) -> Vec<BlockEntry> {
        let mut active = Vec::new();
        self.blocks.for_each(|_, entry| {
            if entry.is_active(now) {
                active.push(entry.clone());
            }
        });
        active
    }

    /// Stored block entries, including expired ones not yet swept.
    pub fn block_count(&self) -> usize {
        self.blocks.size()
    }

    pub fn violator_count(&self) -> usize {
        self.violations.size()
    }

    /// Drops blocks with `now > until` and violations idle for more than
    /// `ttl`. Returns `(expired_blocks, expired_violations)`.
    pub fn cleanup(&self, now: Instant, ttl: Duration) -> (usize, usize) {
        let blocks = self.blocks.retain(|_, entry| now <= entry.until);
        let violations = self
            .violations
            .retain(|_, record| now.saturating_duration_since(record.last_seen_at) <= ttl);
        (blocks, violations)
    }
}
