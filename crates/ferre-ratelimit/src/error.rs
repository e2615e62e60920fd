//! # Rate Limit Error Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Rate Limit Error Categories                          │
//! │                                                                         │
//! │  ┌──────────────────────────┐        ┌──────────────────────────────┐  │
//! │  │  Configuration (fatal)   │        │  Caller                      │  │
//! │  │                          │        │                              │  │
//! │  │  InvalidConfig           │        │  InvalidTokenCount           │  │
//! │  │  UnknownAlgorithm        │        │                              │  │
//! │  │  ConfigLoadFailed        │        │                              │  │
//! │  │  Validation              │        │                              │  │
//! │  └──────────────────────────┘        └──────────────────────────────┘  │
//! │                                                                         │
//! │  Denied requests are NOT errors: see AdmissionDecision.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use ferre_core::ValidationError;
use thiserror::Error;

/// Result type alias for rate limit operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;

#[derive(Debug, Error)]
pub enum RateLimitError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid rate limit configuration.
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    /// Algorithm name not recognized.
    #[error("Unknown rate limit algorithm: '{0}'. Valid options: token_bucket, sliding_window, fixed_window, leaky_bucket")]
    UnknownAlgorithm(String),

    /// Failed to read or parse the config file.
    #[error("Failed to load rate limit config: {0}")]
    ConfigLoadFailed(String),

    /// A config value failed validation.
    #[error("Rate limit config validation failed: {0}")]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// `allow` called with zero tokens.
    #[error("Token count must be at least 1")]
    InvalidTokenCount,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<std::io::Error> for RateLimitError {
    fn from(err: std::io::Error) -> Self {
        RateLimitError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for RateLimitError {
    fn from(err: toml::de::Error) -> Self {
        RateLimitError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl RateLimitError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            RateLimitError::InvalidConfig(_)
                | RateLimitError::UnknownAlgorithm(_)
                | RateLimitError::ConfigLoadFailed(_)
                | RateLimitError::Validation(_)
        )
    }
}
