//! # ferre-ratelimit: Request Admission
//!
//! Per-request admission control for the Ferre POS API servers.
//!
//! ## Module Organization
//! ```text
//! ferre_ratelimit
//! ├── config      - RateLimitConfig (defaults → TOML → env), ConfigHandle
//! ├── algorithm   - TokenBucket, SlidingWindow, FixedWindow, LeakyBucket
//! ├── violations  - ViolationTracker (per-IP counts and temporary blocks)
//! ├── limiter     - RateLimiter (check, check_user, admin operations)
//! ├── sweeper     - background cleanup with panic restart
//! └── error       - RateLimitError
//! ```
//!
//! ## Example
//! ```rust
//! use ferre_core::RequestDescriptor;
//! use ferre_ratelimit::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default()).unwrap();
//! let decision = limiter.check(&RequestDescriptor::new("10.0.0.7", "GET", "/api/v1/products"));
//! assert!(decision.is_allowed());
//! ```

pub mod algorithm;
pub mod config;
pub mod error;
pub mod limiter;
pub mod sweeper;
pub mod violations;

pub use algorithm::{Acquired, AlgorithmLimiter, SharedLimiter};
pub use config::{
    Algorithm, ConfigHandle, EndpointLimit, LimitSpec, RateLimitConfig, UserTypeLimit,
    MAX_DURATION_SECS,
};
pub use error::{RateLimitError, RateLimitResult};
pub use limiter::{LimitInfo, RateLimiter, RateLimiterStats, SweepReport};
pub use sweeper::{Sweeper, SweeperHandle};
pub use violations::{BlockEntry, ViolationRecord, ViolationTracker};
