//! # Admission Types
//!
//! The values that flow through an admission check.
//!
//! ## Type Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Admission Types                                 │
//! │                                                                         │
//! │  ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐  │
//! │  │RequestDescriptor │    │    Principal     │    │    LimiterKey    │  │
//! │  │ ──────────────── │───►│ ──────────────── │───►│ ──────────────── │  │
//! │  │ ip, method, path │    │ user:<id>        │    │ <principal>:     │  │
//! │  │ user_id?         │    │ ip:<address>     │    │ <METHOD>:<path>  │  │
//! │  │ user_type?       │    └──────────────────┘    └────────┬─────────┘  │
//! │  └──────────────────┘                                     │            │
//! │                                                           ▼            │
//! │                          ┌──────────────────┐    ┌──────────────────┐  │
//! │                          │    DenyReason    │◄───│AdmissionDecision │  │
//! │                          │ ──────────────── │    │ ──────────────── │  │
//! │                          │ rate_limited     │    │ allowed          │  │
//! │                          │ blacklisted      │    │ quota?           │  │
//! │                          │ temporarily_     │    │ retry_after?     │  │
//! │                          │   blocked        │    └──────────────────┘  │
//! │                          └──────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Injectivity
//! Principal ids and addresses are percent-escaped (`%` and `:` only) before
//! they are joined with `:`. IPv6 peers (`::1`) and user ids containing `:`
//! therefore never collide with another principal's key.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Principal
// =============================================================================

/// Who a request is attributed to for limiting purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Principal {
    /// An authenticated user, by id.
    User(String),
    /// An anonymous client, by IP address.
    Ip(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(id) => write!(f, "user:{}", escape_segment(id)),
            Principal::Ip(addr) => write!(f, "ip:{}", escape_segment(addr)),
        }
    }
}

// =============================================================================
// Limiter Key
// =============================================================================

/// Composite identity that one algorithm instance is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimiterKey(String);

impl LimiterKey {
    /// Key for a request: `<principal>:<METHOD>:<path>`.
    pub fn for_request(principal: &Principal, method: &str, path: &str) -> Self {
        LimiterKey(format!(
            "{}:{}:{}",
            principal,
            escape_segment(&method.to_ascii_uppercase()),
            path
        ))
    }

    /// Key for a user-type scoped limit: `user:<type>:<id>`.
    pub fn for_user_type(user_type: &str, user_id: &str) -> Self {
        LimiterKey(format!(
            "user:{}:{}",
            escape_segment(user_type),
            escape_segment(user_id)
        ))
    }

    /// Wraps an already-built key, e.g. one supplied by an operator.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        LimiterKey(raw.into())
    }

    /// The key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LimiterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LimiterKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn escape_segment(raw: &str) -> String {
    if !raw.contains(['%', ':']) {
        return raw.to_string();
    }

    let mut escaped = String::with_capacity(raw.len() + 4);
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

// =============================================================================
// Request Descriptor
// =============================================================================

/// The facts about one inbound request that admission depends on.
///
/// User identity must come from an authenticated source, never from a
/// client-supplied header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Client IP address as resolved by the HTTP boundary.
    pub ip: String,

    /// HTTP method, upper-cased.
    pub method: String,

    /// Request path without query string.
    pub path: String,

    /// Authenticated user id, if any.
    pub user_id: Option<String>,

    /// Authenticated user class (e.g. "admin", "cajero"), if any.
    pub user_type: Option<String>,
}

impl RequestDescriptor {
    /// Creates an anonymous request descriptor.
    pub fn new(ip: impl Into<String>, method: &str, path: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            method: method.to_ascii_uppercase(),
            path: path.into(),
            user_id: None,
            user_type: None,
        }
    }

    /// Attaches an authenticated user.
    pub fn with_user(mut self, user_id: impl Into<String>, user_type: Option<&str>) -> Self {
        self.user_id = Some(user_id.into());
        self.user_type = user_type.map(str::to_string);
        self
    }

    /// The principal this request is attributed to.
    pub fn principal(&self) -> Principal {
        match &self.user_id {
            Some(id) if !id.is_empty() => Principal::User(id.clone()),
            _ => Principal::Ip(self.ip.clone()),
        }
    }

    /// The limiter key for this request.
    pub fn limiter_key(&self) -> LimiterKey {
        LimiterKey::for_request(&self.principal(), &self.method, &self.path)
    }

    /// The endpoint override lookup key: `"METHOD /path"`.
    pub fn endpoint_key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The key's quota is exhausted.
    RateLimited,
    /// The IP is on the configured blacklist.
    Blacklisted,
    /// The IP is serving a violation block.
    TemporarilyBlocked,
}

impl DenyReason {
    /// Machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            DenyReason::RateLimited => "rate_limited",
            DenyReason::Blacklisted => "blacklisted",
            DenyReason::TemporarilyBlocked => "temporarily_blocked",
        }
    }

    /// Human-readable message safe to return to clients.
    pub const fn message(&self) -> &'static str {
        match self {
            DenyReason::RateLimited => "Too many requests, please slow down",
            DenyReason::Blacklisted => "Access denied",
            DenyReason::TemporarilyBlocked => "Temporarily blocked due to repeated violations",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Quota snapshot attached to a checked decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    /// Requests allowed per window.
    pub limit: u32,

    /// Requests left in the current window.
    pub remaining: u32,

    /// When the window resets (wall clock).
    pub reset_time: DateTime<Utc>,

    /// Length of the window.
    #[serde(with = "duration_secs")]
    pub window: Duration,
}

/// Outcome of one admission check.
///
/// Bypass decisions (limiter disabled, whitelisted IP) carry no quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    pub quota: Option<Quota>,
    #[serde(with = "option_duration_secs")]
    pub retry_after: Option<Duration>,
}

impl AdmissionDecision {
    /// Allowed without consulting any limiter.
    pub fn bypass() -> Self {
        Self {
            allowed: true,
            reason: None,
            quota: None,
            retry_after: None,
        }
    }

    /// Allowed by a limiter.
    pub fn admitted(quota: Quota) -> Self {
        Self {
            allowed: true,
            reason: None,
            quota: Some(quota),
            retry_after: None,
        }
    }

    /// Denied for `reason`.
    pub fn denied(reason: DenyReason, quota: Option<Quota>, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            quota,
            retry_after,
        }
    }

    #[inline]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod option_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|secs| secs.map(Duration::from_secs))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
