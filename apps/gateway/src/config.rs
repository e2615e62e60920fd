//! Gateway configuration module.
//!
//! Configuration is loaded from environment variables with fallback to defaults.
//! Rate limit settings live in their own file, see
//! [`ferre_ratelimit::RateLimitConfig::load`].

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use ferre_concurrency::{CircuitBreakerConfig, WorkerPoolConfig};
use ferre_ratelimit::MAX_DURATION_SECS;
use serde::{Deserialize, Serialize};

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    /// Report worker count (default: available parallelism)
    pub report_workers: usize,

    /// Report job queue capacity (default: 2 × workers)
    pub report_queue_capacity: usize,

    /// Consecutive report failures before the breaker opens
    pub breaker_max_failures: u32,

    /// Upper bound on one report in seconds (0 disables)
    pub breaker_timeout_secs: u64,

    /// Seconds the breaker stays open before a trial call
    pub breaker_reset_timeout_secs: u64,

    /// Seconds a finished report's status stays queryable
    pub report_status_ttl_secs: u64,

    /// Explicit rate_limit.toml path (default: platform config dir)
    pub rate_limit_config: Option<PathBuf>,
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|name| env::var(name).ok())
    }

    /// Load configuration through `var`, which stands in for the environment.
    pub fn load_from<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_workers = WorkerPoolConfig::default().workers;

        let report_workers: usize = parse_or(&var, "GATEWAY_REPORT_WORKERS", default_workers)?;
        let config = GatewayConfig {
            bind_addr: var("GATEWAY_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),

            report_workers,

            report_queue_capacity: parse_or(
                &var,
                "GATEWAY_REPORT_QUEUE_CAPACITY",
                report_workers * 2,
            )?,

            breaker_max_failures: parse_or(&var, "GATEWAY_BREAKER_MAX_FAILURES", 5)?,

            breaker_timeout_secs: parse_or(&var, "GATEWAY_BREAKER_TIMEOUT_SECS", 30)?,

            breaker_reset_timeout_secs: parse_or(&var, "GATEWAY_BREAKER_RESET_TIMEOUT_SECS", 60)?,

            report_status_ttl_secs: parse_or(&var, "GATEWAY_REPORT_STATUS_TTL_SECS", 3600)?,

            rate_limit_config: var("FERRE_RATE_LIMIT_CONFIG").map(PathBuf::from),
        };

        if config.report_workers == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_REPORT_WORKERS".to_string()));
        }
        if config.report_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_REPORT_QUEUE_CAPACITY".to_string(),
            ));
        }
        if config.breaker_max_failures == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_BREAKER_MAX_FAILURES".to_string(),
            ));
        }
        if config.report_status_ttl_secs == 0 || config.report_status_ttl_secs > MAX_DURATION_SECS
        {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_REPORT_STATUS_TTL_SECS".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::with_workers(self.report_workers)
            .queue_capacity(self.report_queue_capacity)
            .results_capacity(self.report_queue_capacity)
    }

    pub fn report_status_ttl(&self) -> Duration {
        Duration::from_secs(self.report_status_ttl_secs)
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_failures: self.breaker_max_failures,
            timeout: Duration::from_secs(self.breaker_timeout_secs),
            reset_timeout: Duration::from_secs(self.breaker_reset_timeout_secs),
        }
    }
}

fn parse_or<F, T>(var: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        None => Ok(default),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::load_from(env(&[])).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(config.report_workers >= 1);
        assert_eq!(config.report_queue_capacity, config.report_workers * 2);
        assert_eq!(config.breaker_max_failures, 5);
        assert!(config.rate_limit_config.is_none());
        assert_eq!(config.report_status_ttl(), Duration::from_secs(3600));

        let breaker = config.circuit_breaker();
        assert_eq!(breaker.timeout, Duration::from_secs(30));
        assert_eq!(breaker.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::load_from(env(&[
            ("GATEWAY_BIND_ADDR", "127.0.0.1:9000"),
            ("GATEWAY_REPORT_WORKERS", "3"),
            ("GATEWAY_BREAKER_MAX_FAILURES", "2"),
            ("GATEWAY_REPORT_STATUS_TTL_SECS", "600"),
            ("FERRE_RATE_LIMIT_CONFIG", "/etc/ferre/rate_limit.toml"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.report_workers, 3);
        assert_eq!(config.report_queue_capacity, 6);
        assert_eq!(config.worker_pool().queue_capacity, 6);
        assert_eq!(config.circuit_breaker().max_failures, 2);
        assert_eq!(config.report_status_ttl(), Duration::from_secs(600));
        assert_eq!(
            config.rate_limit_config,
            Some(PathBuf::from("/etc/ferre/rate_limit.toml"))
        );
    }

    #[test]
    fn test_invalid_values() {
        let err = GatewayConfig::load_from(env(&[("GATEWAY_REPORT_WORKERS", "many")])).unwrap_err();
        assert!(err.to_string().contains("GATEWAY_REPORT_WORKERS"));

        assert!(GatewayConfig::load_from(env(&[("GATEWAY_REPORT_WORKERS", "0")])).is_err());
        assert!(
            GatewayConfig::load_from(env(&[("GATEWAY_BREAKER_MAX_FAILURES", "0")])).is_err()
        );
        for ttl in ["0", "99999999999"] {
            let err = GatewayConfig::load_from(env(&[("GATEWAY_REPORT_STATUS_TTL_SECS", ttl)]))
                .unwrap_err();
            assert!(err.to_string().contains("GATEWAY_REPORT_STATUS_TTL_SECS"));
        }
    }
}
