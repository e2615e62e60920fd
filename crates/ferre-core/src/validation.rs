//! # Validation Module
//!
//! Validation rules for rate-limit configuration values.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  ├── Types, unknown enum variants (algorithm = "bogus")                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Positive limits and windows                                       │
//! │  ├── Parsable IP addresses                                             │
//! │  └── "METHOD /path" endpoint keys                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Startup                                                      │
//! │  └── Any error aborts initialization, never a silent default           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use ferre_core::validation::{parse_endpoint_key, validate_positive};
//!
//! validate_positive("default_limit", 100).unwrap();
//! let (method, path) = parse_endpoint_key("post /api/v1/ventas").unwrap();
//! assert_eq!(method, "POST");
//! assert_eq!(path, "/api/v1/ventas");
//! ```

use std::net::IpAddr;

use crate::error::ValidationError;
use crate::HTTP_METHODS;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates that a count or duration (in whole units) is greater than zero.
///
/// ## Example
/// ```rust
/// use ferre_core::validation::validate_positive;
///
/// assert!(validate_positive("default_window_secs", 60).is_ok());
/// assert!(validate_positive("default_window_secs", 0).is_err());
/// ```
pub fn validate_positive(field: &str, value: u64) -> ValidationResult<()> {
    if value == 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a user-type multiplier.
///
/// ## Rules
/// - Must be finite
/// - Must be between 0 and 1000 (0 means "no scaling")
pub fn validate_multiplier(field: &str, multiplier: f64) -> ValidationResult<()> {
    if !multiplier.is_finite() || !(0.0..=1000.0).contains(&multiplier) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: 1000,
        });
    }

    Ok(())
}

// =============================================================================
// Network Validators
// =============================================================================

/// Validates an IP address entry from a whitelist or blacklist.
///
/// Entries are matched verbatim, so surrounding whitespace is an error.
pub fn validate_ip(field: &str, ip: &str) -> ValidationResult<()> {
    let trimmed = ip.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if trimmed.len() != ip.len() {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' has surrounding whitespace", ip),
        });
    }

    ip.parse::<IpAddr>()
        .map_err(|_| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' is not an IP address", ip),
        })?;

    Ok(())
}

/// Validates an HTTP method and returns it upper-cased.
pub fn validate_http_method(method: &str) -> ValidationResult<String> {
    let upper = method.trim().to_ascii_uppercase();

    if !HTTP_METHODS.contains(&upper.as_str()) {
        return Err(ValidationError::NotAllowed {
            field: "method".to_string(),
            allowed: HTTP_METHODS.iter().map(|m| m.to_string()).collect(),
        });
    }

    Ok(upper)
}

/// Validates an endpoint path.
///
/// ## Rules
/// - Must start with `/`
/// - Must not contain whitespace
pub fn validate_endpoint_path(path: &str) -> ValidationResult<()> {
    if !path.starts_with('/') {
        return Err(ValidationError::InvalidFormat {
            field: "path".to_string(),
            reason: format!("'{}' must start with '/'", path),
        });
    }

    if path.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "path".to_string(),
            reason: format!("'{}' must not contain whitespace", path),
        });
    }

    Ok(())
}

/// Parses an endpoint limit key of the form `"METHOD /path"`.
///
/// The method is normalized to upper case so lookups built from live
/// requests match regardless of how the config file spelled it.
pub fn parse_endpoint_key(key: &str) -> ValidationResult<(String, String)> {
    let mut parts = key.split_whitespace();

    let (Some(method), Some(path), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::InvalidFormat {
            field: "endpoint_limits".to_string(),
            reason: format!("'{}' must look like \"GET /api/path\"", key),
        });
    };

    let method = validate_http_method(method)?;
    validate_endpoint_path(path)?;

    Ok((method, path.to_string()))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive("limit", 1).is_ok());
        assert!(validate_positive("limit", u64::MAX).is_ok());
        assert_eq!(
            validate_positive("limit", 0),
            Err(ValidationError::MustBePositive {
                field: "limit".to_string()
            })
        );
    }

    #[test]
    fn test_validate_multiplier() {
        assert!(validate_multiplier("multiplier", 0.0).is_ok());
        assert!(validate_multiplier("multiplier", 2.5).is_ok());
        assert!(validate_multiplier("multiplier", -1.0).is_err());
        assert!(validate_multiplier("multiplier", f64::NAN).is_err());
        assert!(validate_multiplier("multiplier", f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_ip() {
        assert!(validate_ip("whitelist_ips", "127.0.0.1").is_ok());
        assert!(validate_ip("whitelist_ips", "::1").is_ok());
        assert!(validate_ip("whitelist_ips", "").is_err());
        assert!(validate_ip("whitelist_ips", "10.0.0").is_err());
        assert!(validate_ip("whitelist_ips", "localhost").is_err());
        assert!(validate_ip("whitelist_ips", " 10.0.0.1").is_err());
        assert!(validate_ip("blacklist_ips", "10.0.0.1\t").is_err());
    }

    #[test]
    fn test_validate_http_method() {
        assert_eq!(validate_http_method("get").unwrap(), "GET");
        assert_eq!(validate_http_method(" Post ").unwrap(), "POST");
        assert!(validate_http_method("FETCH").is_err());
    }

    #[test]
    fn test_parse_endpoint_key() {
        assert_eq!(
            parse_endpoint_key("POST /api/v1/auth/login").unwrap(),
            ("POST".to_string(), "/api/v1/auth/login".to_string())
        );
        assert!(parse_endpoint_key("/api/v1/auth/login").is_err());
        assert!(parse_endpoint_key("POST api/login").is_err());
        assert!(parse_endpoint_key("POST /a /b").is_err());
        assert!(parse_endpoint_key("").is_err());
    }
}
