//! # Rate Limit Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FERRE_RATE_LIMIT_ENABLED=false                                     │
//! │     FERRE_RATE_LIMIT_ALGORITHM=sliding_window                          │
//! │     FERRE_RATE_LIMIT_DEFAULT_LIMIT=200                                 │
//! │     FERRE_RATE_LIMIT_DEFAULT_WINDOW_SECS=60                            │
//! │     FERRE_RATE_LIMIT_BLOCK_ON_VIOLATION=true                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ferre-pos/rate_limit.toml (Linux)                        │
//! │     ~/Library/Application Support/com.ferre.pos/rate_limit.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     100 requests / 60s, burst 10, token bucket                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A loaded config is validated before use and never mutated afterwards. A
//! reload builds a new one and swaps it in through [`ConfigHandle`].
//!
//! ## Configuration File Format
//! ```toml
//! # rate_limit.toml
//! enabled = true
//! algorithm = "token_bucket"   # token_bucket | sliding_window | fixed_window | leaky_bucket
//! default_limit = 100
//! default_window_secs = 60
//! burst_limit = 10
//! block_on_violation = true
//! block_duration_secs = 900
//! whitelist_ips = ["127.0.0.1"]
//! blacklist_ips = []
//!
//! [endpoint_limits."POST /api/v1/auth/login"]
//! limit = 5
//! window_secs = 60
//! burst = 5
//!
//! [user_type_limits.cajero]
//! limit = 300
//! window_secs = 60
//! multiplier = 1.5
//! ```

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use ferre_core::validation::{
    parse_endpoint_key, validate_ip, validate_multiplier, validate_positive,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RateLimitError, RateLimitResult};

/// Upper bound for every configured duration: one year.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

// =============================================================================
// Algorithm
// =============================================================================

/// Which admission algorithm backs every limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    LeakyBucket,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::TokenBucket => write!(f, "token_bucket"),
            Algorithm::SlidingWindow => write!(f, "sliding_window"),
            Algorithm::FixedWindow => write!(f, "fixed_window"),
            Algorithm::LeakyBucket => write!(f, "leaky_bucket"),
        }
    }
}

impl std::str::FromStr for Algorithm {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "sliding_window" => Ok(Algorithm::SlidingWindow),
            "fixed_window" => Ok(Algorithm::FixedWindow),
            "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            other => Err(RateLimitError::UnknownAlgorithm(other.to_string())),
        }
    }
}

// =============================================================================
// Limits
// =============================================================================

/// The resolved `(limit, window, burst)` for one limiter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitSpec {
    /// Requests per window.
    pub limit: u32,
    /// Window length.
    #[serde(serialize_with = "serialize_secs")]
    pub window: Duration,
    /// Bucket capacity for token and leaky buckets; 0 means "use `limit`".
    pub burst: u32,
}

impl LimitSpec {
    pub fn new(limit: u32, window: Duration, burst: u32) -> Self {
        Self {
            limit,
            window,
            burst,
        }
    }

    /// Bucket capacity: `burst` when set, else `limit`.
    pub fn capacity(&self) -> u32 {
        if self.burst > 0 {
            self.burst
        } else {
            self.limit
        }
    }

    /// Steady-state spacing between admitted requests: `window / limit`.
    pub fn interval(&self) -> Duration {
        let interval = if self.limit == 0 {
            self.window
        } else {
            self.window / self.limit
        };
        interval.max(Duration::from_nanos(1))
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Override for one `"METHOD /path"` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointLimit {
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub burst: u32,
    /// Informational: the endpoint is only reachable when authenticated.
    #[serde(default)]
    pub require_auth: bool,
}

impl EndpointLimit {
    pub fn spec(&self) -> LimitSpec {
        LimitSpec::new(self.limit, Duration::from_secs(self.window_secs), self.burst)
    }
}

/// Override for one user class, applied on the user-scoped check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTypeLimit {
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub burst: u32,
    /// Scales `limit` when greater than zero.
    #[serde(default)]
    pub multiplier: f64,
}

impl UserTypeLimit {
    /// `limit × multiplier` (rounded, at least 1) when the multiplier is set.
    pub fn effective_limit(&self) -> u32 {
        if self.multiplier > 0.0 {
            let scaled = (f64::from(self.limit) * self.multiplier).round();
            scaled.clamp(1.0, f64::from(u32::MAX)) as u32
        } else {
            self.limit
        }
    }

    pub fn spec(&self) -> LimitSpec {
        LimitSpec::new(
            self.effective_limit(),
            Duration::from_secs(self.window_secs),
            self.burst,
        )
    }
}

// =============================================================================
// Rate Limit Config
// =============================================================================

/// Process-wide rate limit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Master switch. Disabled means every check allows.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub algorithm: Algorithm,

    /// Requests per window when no override applies.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    #[serde(default = "default_window_secs")]
    pub default_window_secs: u64,

    /// Default bucket capacity; 0 means "same as the limit".
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,

    /// Keyed by `"METHOD /path"`.
    #[serde(default)]
    pub endpoint_limits: HashMap<String, EndpointLimit>,

    /// Keyed by user type (e.g. "admin", "cajero", "supervisor").
    #[serde(default)]
    pub user_type_limits: HashMap<String, UserTypeLimit>,

    #[serde(default)]
    pub whitelist_ips: HashSet<String>,

    /// Takes precedence over the whitelist.
    #[serde(default)]
    pub blacklist_ips: HashSet<String>,

    /// Emit a warning per violation.
    #[serde(default = "default_true")]
    pub log_violations: bool,

    /// Temporarily block an IP once it reaches the violation threshold.
    #[serde(default)]
    pub block_on_violation: bool,

    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,

    /// How often expired blocks, stale violations and idle limiters are swept.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Violations older than this are forgotten.
    #[serde(default = "default_violation_ttl_secs")]
    pub violation_ttl_secs: u64,

    /// Limiter state unused for this long is evicted.
    #[serde(default = "default_limiter_idle_ttl_secs")]
    pub limiter_idle_ttl_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_limit() -> u32 {
    100
}
fn default_window_secs() -> u64 {
    60
}
fn default_burst_limit() -> u32 {
    10
}
fn default_block_duration_secs() -> u64 {
    15 * 60
}
fn default_cleanup_interval_secs() -> u64 {
    5 * 60
}
fn default_violation_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_limiter_idle_ttl_secs() -> u64 {
    60 * 60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: Algorithm::default(),
            default_limit: default_limit(),
            default_window_secs: default_window_secs(),
            burst_limit: default_burst_limit(),
            endpoint_limits: HashMap::new(),
            user_type_limits: HashMap::new(),
            whitelist_ips: HashSet::new(),
            blacklist_ips: HashSet::new(),
            log_violations: true,
            block_on_violation: false,
            block_duration_secs: default_block_duration_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            violation_ttl_secs: default_violation_ttl_secs(),
            limiter_idle_ttl_secs: default_limiter_idle_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (rate_limit.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> RateLimitResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading rate limit config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Rate limit config file not found, using defaults");
            }
        }

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.prepare()
    }

    /// Parses a TOML document. Missing fields take their defaults.
    pub fn from_toml(contents: &str) -> RateLimitResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates, then normalizes endpoint keys to `"METHOD /path"` with an
    /// upper-case method.
    ///
    /// IP list entries are trimmed and rewritten in canonical form, so
    /// `" 2001:DB8::1"` matches the peer address `2001:db8::1`.
    pub fn prepare(mut self) -> RateLimitResult<Self> {
        self.whitelist_ips = canonical_ips(self.whitelist_ips);
        self.blacklist_ips = canonical_ips(self.blacklist_ips);
        self.validate()?;

        let mut normalized = HashMap::with_capacity(self.endpoint_limits.len());
        for (key, limit) in self.endpoint_limits.drain() {
            let (method, path) = parse_endpoint_key(&key)?;
            normalized.insert(format!("{} {}", method, path), limit);
        }
        self.endpoint_limits = normalized;

        Ok(self)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RateLimitResult<()> {
        validate_positive("default_limit", u64::from(self.default_limit))?;
        validate_duration("default_window_secs", self.default_window_secs)?;
        validate_duration("block_duration_secs", self.block_duration_secs)?;
        validate_duration("cleanup_interval_secs", self.cleanup_interval_secs)?;
        validate_duration("violation_ttl_secs", self.violation_ttl_secs)?;
        validate_duration("limiter_idle_ttl_secs", self.limiter_idle_ttl_secs)?;

        for (key, limit) in &self.endpoint_limits {
            parse_endpoint_key(key)?;
            if limit.limit == 0 || limit.window_secs == 0 {
                return Err(RateLimitError::InvalidConfig(format!(
                    "endpoint limit '{}' needs a positive limit and window",
                    key
                )));
            }
            validate_duration(
                &format!("endpoint_limits['{}'].window_secs", key),
                limit.window_secs,
            )?;
        }

        for (user_type, limit) in &self.user_type_limits {
            if user_type.trim().is_empty() {
                return Err(RateLimitError::InvalidConfig(
                    "user_type_limits keys must not be empty".into(),
                ));
            }
            if limit.limit == 0 || limit.window_secs == 0 {
                return Err(RateLimitError::InvalidConfig(format!(
                    "user type limit '{}' needs a positive limit and window",
                    user_type
                )));
            }
            validate_duration(
                &format!("user_type_limits['{}'].window_secs", user_type),
                limit.window_secs,
            )?;
            validate_multiplier("multiplier", limit.multiplier)?;
        }

        for ip in &self.whitelist_ips {
            validate_ip("whitelist_ips", ip)?;
        }
        for ip in &self.blacklist_ips {
            validate_ip("blacklist_ips", ip)?;
        }

        Ok(())
    }

    /// Applies `FERRE_RATE_LIMIT_*` overrides read through `var`.
    ///
    /// Unparsable values are errors, not silently ignored.
    pub fn apply_overrides<F>(&mut self, var: F) -> RateLimitResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(enabled) = var("FERRE_RATE_LIMIT_ENABLED") {
            self.enabled = parse_bool("FERRE_RATE_LIMIT_ENABLED", &enabled)?;
            debug!(enabled = self.enabled, "Overriding rate limit switch from environment");
        }

        if let Some(algorithm) = var("FERRE_RATE_LIMIT_ALGORITHM") {
            self.algorithm = algorithm.parse()?;
            debug!(algorithm = %self.algorithm, "Overriding algorithm from environment");
        }

        if let Some(limit) = var("FERRE_RATE_LIMIT_DEFAULT_LIMIT") {
            self.default_limit = parse_number("FERRE_RATE_LIMIT_DEFAULT_LIMIT", &limit)?;
        }

        if let Some(window) = var("FERRE_RATE_LIMIT_DEFAULT_WINDOW_SECS") {
            self.default_window_secs =
                parse_number("FERRE_RATE_LIMIT_DEFAULT_WINDOW_SECS", &window)?;
        }

        if let Some(block) = var("FERRE_RATE_LIMIT_BLOCK_ON_VIOLATION") {
            self.block_on_violation = parse_bool("FERRE_RATE_LIMIT_BLOCK_ON_VIOLATION", &block)?;
        }

        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "ferre", "pos")
            .map(|dirs| dirs.config_dir().join("rate_limit.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn default_window(&self) -> Duration {
        Duration::from_secs(self.default_window_secs)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn violation_ttl(&self) -> Duration {
        Duration::from_secs(self.violation_ttl_secs)
    }

    pub fn limiter_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.limiter_idle_ttl_secs)
    }

    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.whitelist_ips.contains(ip)
    }

    pub fn is_blacklisted(&self, ip: &str) -> bool {
        self.blacklist_ips.contains(ip)
    }

    /// The default `(limit, window, burst)`.
    pub fn default_spec(&self) -> LimitSpec {
        LimitSpec::new(self.default_limit, self.default_window(), self.burst_limit)
    }

    /// Endpoint override for `"METHOD /path"`, else the default.
    pub fn endpoint_spec(&self, endpoint_key: &str) -> LimitSpec {
        self.endpoint_limits
            .get(endpoint_key)
            .map(EndpointLimit::spec)
            .unwrap_or_else(|| self.default_spec())
    }
}

fn validate_duration(field: &str, secs: u64) -> RateLimitResult<()> {
    validate_positive(field, secs)?;
    if secs > MAX_DURATION_SECS {
        return Err(RateLimitError::InvalidConfig(format!(
            "{} must be at most {} seconds, got {}",
            field, MAX_DURATION_SECS, secs
        )));
    }
    Ok(())
}

/// Trims entries and rewrites parseable ones as `IpAddr` displays them.
/// Anything unparseable is left for `validate` to reject.
fn canonical_ips(ips: HashSet<String>) -> HashSet<String> {
    ips.into_iter()
        .map(|ip| match ip.trim().parse::<IpAddr>() {
            Ok(addr) => addr.to_string(),
            Err(_) => ip,
        })
        .collect()
}

fn parse_bool(name: &str, raw: &str) -> RateLimitResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(RateLimitError::InvalidConfig(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> RateLimitResult<T> {
    raw.trim().parse().map_err(|_| {
        RateLimitError::InvalidConfig(format!("{} must be a number, got '{}'", name, raw))
    })
}

// =============================================================================
// Config Handle
// =============================================================================

/// Shared, atomically swappable config snapshot.
///
/// Readers get an `Arc` to an immutable snapshot and never block writers.
#[derive(Debug)]
pub struct ConfigHandle {
    current: ArcSwap<RateLimitConfig>,
}

impl ConfigHandle {
    /// Validates and wraps `config`.
    pub fn new(config: RateLimitConfig) -> RateLimitResult<Self> {
        Ok(Self {
            current: ArcSwap::from_pointee(config.prepare()?),
        })
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<RateLimitConfig> {
        self.current.load_full()
    }

    /// Validates `config` and swaps it in. Returns the previous snapshot.
    /// On error the current snapshot is untouched.
    pub fn replace(&self, config: RateLimitConfig) -> RateLimitResult<Arc<RateLimitConfig>> {
        let prepared = config.prepare()?;
        Ok(self.current.swap(Arc::new(prepared)))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
