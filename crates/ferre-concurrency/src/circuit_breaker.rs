//! # Circuit Breaker
//!
//! Guards calls to an unreliable downstream (payment gateway, inventory
//! service, label printer) and fails fast while it is known to be down.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │            failure_count ≥ max_failures                                 │
//! │   ┌────────┐ ─────────────────────────► ┌────────┐                      │
//! │   │ Closed │                            │  Open  │ ◄──────────┐         │
//! │   └────────┘ ◄───────┐                  └────────┘            │         │
//! │        ▲             │                       │                │         │
//! │        │ success     │ trial succeeds        │ reset_timeout  │ trial   │
//! │        │ resets      │ (count → 0)           │ since last     │ fails   │
//! │        │ count       │                       ▼ failure        │         │
//! │        └─────        │                  ┌──────────┐          │         │
//! │                      └──────────────────│ HalfOpen │──────────┘         │
//! │                                         └──────────┘                    │
//! │                                    one trial at a time;                 │
//! │                                    others fail fast                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The internal lock is only held to admit a call and to record its outcome,
//! never while the operation runs.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use ferre_core::{system_clock, NoopMetrics, SharedClock, SharedMetrics};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::BreakerError;

// =============================================================================
// State & Configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub max_failures: u32,
    /// Upper bound on one async call. `Duration::ZERO` disables it.
    pub timeout: Duration,
    /// How long the circuit stays open after the last failure.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker, for health and admin endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub max_failures: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub timeout_secs: f64,
    pub reset_timeout_secs: f64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

// =============================================================================
// Circuit Breaker
// =============================================================================

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    clock: SharedClock,
    metrics: SharedMetrics,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_failure_wall: None,
                trial_in_flight: false,
            }),
            clock: system_clock(),
            metrics: NoopMetrics::shared(),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Reports `HalfOpen` once the reset timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Forces the circuit closed with a clean failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.last_failure_wall = None;
        inner.trial_in_flight = false;
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            max_failures: self.config.max_failures,
            last_failure_time: inner.last_failure_wall,
            timeout_secs: self.config.timeout.as_secs_f64(),
            reset_timeout_secs: self.config.reset_timeout.as_secs_f64(),
        }
    }

    /// Runs `op` through the breaker, bounded by the configured timeout.
    ///
    /// A timeout counts as a failure.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.admit()?;
        let started = self.clock.now();

        let outcome = if self.config.timeout.is_zero() {
            Ok(op().await)
        } else {
            tokio::time::timeout(self.config.timeout, op()).await
        };
        self.metrics
            .record_duration(&self.name, self.clock.now().saturating_duration_since(started));

        match outcome {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure();
                Err(BreakerError::Operation(e))
            }
            Err(_) => {
                permit.failure();
                self.metrics.record_business_error(&self.name, "timeout");
                warn!(breaker = %self.name, timeout = ?self.config.timeout, "Circuit breaker call timed out");
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: self.config.timeout,
                })
            }
        }
    }

    /// Runs a blocking `op` through the breaker. No timeout applies.
    pub fn execute_sync<F, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.admit()?;
        match op() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(BreakerError::Operation(e))
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Open → HalfOpen once `reset_timeout` has passed since the last failure.
    fn refresh(&self, inner: &mut Inner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure
            .map(|t| self.clock.now().saturating_duration_since(t))
            .unwrap_or(Duration::MAX);
        if elapsed >= self.config.reset_timeout {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
            info!(breaker = %self.name, "Circuit breaker half-open");
        }
    }

    fn admit<E>(&self) -> Result<Permit<'_>, BreakerError<E>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);

        let retry_after = match inner.state {
            CircuitState::Closed => {
                return Ok(Permit::new(self, false));
            }
            CircuitState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                debug!(breaker = %self.name, "Circuit breaker admitting trial call");
                return Ok(Permit::new(self, true));
            }
            CircuitState::HalfOpen => Duration::ZERO,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| self.clock.now().saturating_duration_since(t))
                    .unwrap_or_default();
                self.config.reset_timeout.saturating_sub(elapsed)
            }
        };
        drop(inner);

        self.metrics.record_business_error(&self.name, "circuit_open");
        Err(BreakerError::Open {
            name: self.name.clone(),
            retry_after,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                info!(breaker = %self.name, "Circuit breaker closed");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // A call admitted before the circuit opened; it proves nothing.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(self.clock.now());
        inner.last_failure_wall = Some(self.clock.wall());

        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "Circuit breaker trial failed, reopening"
                );
            }
            CircuitState::Closed if inner.failure_count >= self.config.max_failures => {
                inner.state = CircuitState::Open;
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    max_failures = self.config.max_failures,
                    "Circuit breaker opened"
                );
            }
            _ => {}
        }
    }
}

/// Admission for one call. Dropping it unsettled (the call's future was
/// cancelled) records a failure so a HalfOpen trial slot is never leaked.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_failure(self.trial);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
