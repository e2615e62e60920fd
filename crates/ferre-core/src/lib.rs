//! # ferre-core: Pure Admission Types for Ferre POS
//!
//! The shared vocabulary of the admission-control layer. Every other crate in
//! the workspace speaks in these types; none of them perform I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Ferre POS Admission Layer                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 apps/gateway (HTTP boundary)                    │   │
//! │  │     client IP extraction ──► check() ──► 429 / 403 / next       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │   ferre-ratelimit               ferre-concurrency               │   │
//! │  │   RateLimiter, algorithms       WorkerPool, CircuitBreaker,     │   │
//! │  │   violations, sweeper           SafeMap, SafeCounter            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ferre-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   clock   │  │  metrics  │  │ validation│  │   │
//! │  │   │ Decision  │  │  System   │  │   Sink    │  │   rules   │  │   │
//! │  │   │ LimiterKey│  │  Manual   │  │   Noop    │  │   checks  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TASKS • NO GLOBAL STATE                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Request descriptors, principals, limiter keys, decisions
//! - [`clock`] - Injectable time source (`SystemClock`, `ManualClock`)
//! - [`metrics`] - Fire-and-forget metrics seam (`MetricsSink`, `NoopMetrics`)
//! - [`error`] - Validation error types
//! - [`validation`] - Config value validation rules
//!
//! ## Example Usage
//!
//! ```rust
//! use ferre_core::{LimiterKey, RequestDescriptor};
//!
//! let anonymous = RequestDescriptor::new("10.0.0.7", "get", "/api/v1/products");
//! assert_eq!(anonymous.limiter_key().as_str(), "ip:10.0.0.7:GET:/api/v1/products");
//!
//! let cashier = anonymous.clone().with_user("42", Some("cajero"));
//! assert_eq!(cashier.limiter_key(), LimiterKey::for_request(&cashier.principal(), "GET", "/api/v1/products"));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod error;
pub mod metrics;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use error::ValidationError;
pub use metrics::{MetricsSink, NoopMetrics, SharedMetrics};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of violations from one IP that escalates to a temporary block.
pub const VIOLATION_BLOCK_THRESHOLD: u32 = 5;

/// HTTP methods accepted in endpoint limit keys.
pub const HTTP_METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
