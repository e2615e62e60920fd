//! # Error Types
//!
//! Validation errors shared by the admission crates.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ferre-core (this file)                                                │
//! │  └── ValidationError    - A config value breaks a rule                 │
//! │                                                                         │
//! │  ferre-ratelimit                                                       │
//! │  └── RateLimitError     - Config/load failures, caller errors          │
//! │                                                                         │
//! │  ferre-concurrency                                                     │
//! │  ├── ConcurrencyError   - Pool full / not running                      │
//! │  └── BreakerError<E>    - Circuit open, timeout, operation error       │
//! │                                                                         │
//! │  Flow: ValidationError → RateLimitError → startup aborts               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Admission denials are NOT errors. They travel as
//! [`AdmissionDecision`](crate::AdmissionDecision) values.

use thiserror::Error;

// =============================================================================
// Validation Error
// =============================================================================

/// Config value validation errors.
///
/// Raised while validating a rate-limit configuration snapshot. Any of these
/// at startup prevents the limiter from initializing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., unparsable IP address, path without leading slash).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Unit Tests
// =============================================================================
