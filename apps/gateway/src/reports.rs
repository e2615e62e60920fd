//! # Report Generation Service
//!
//! Sales reports are summarised off the request path.
//!
//! ```text
//! POST /reports/generate ──► ReportService::submit ──► WorkerPool (bounded)
//!        │                        │ PoolFull → 503 busy        │
//!        │                        │ breaker open → 503          ▼
//!        ▼                        │                  CircuitBreaker::execute
//!   { job_id }                    │                            │
//!                                 ▼                            ▼
//! GET /reports/status/{id} ◄── statuses (SafeMap) ◄── results collector task
//! ```
//!
//! Finished statuses are kept for `status_ttl` after completion, then dropped
//! by [`ReportService::prune_statuses`]. Queued statuses are never pruned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ferre_concurrency::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState, Job, JobError,
    JobResult, PoolStats, SafeMap, WorkerPool, WorkerPoolConfig,
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Report Types
// =============================================================================

/// One sold line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

/// Request body for a sales summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateReportRequest {
    pub store_id: String,
    pub lines: Vec<SaleLine>,
}

impl GenerateReportRequest {
    pub fn validate(&self) -> GatewayResult<()> {
        if self.store_id.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("store_id is required".into()));
        }
        if self.lines.is_empty() {
            return Err(GatewayError::InvalidRequest("report has no lines".into()));
        }
        if let Some(line) = self.lines.iter().find(|l| l.sku.trim().is_empty()) {
            return Err(GatewayError::InvalidRequest(format!(
                "line with quantity {} has no sku",
                line.quantity
            )));
        }
        if self.lines.iter().any(|l| l.unit_price_cents < 0) {
            return Err(GatewayError::InvalidRequest(
                "unit_price_cents must not be negative".into(),
            ));
        }
        Ok(())
    }
}

/// Computed sales summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub store_id: String,
    pub total_items: u64,
    pub gross_cents: i64,
    pub distinct_skus: usize,
    /// Highest-revenue SKU; ties go to the lexicographically smaller SKU.
    pub top_sku: Option<String>,
}

/// Lifecycle of a submitted report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReportStatus {
    Queued {
        submitted_at: DateTime<Utc>,
    },
    Completed {
        summary: ReportSummary,
        completed_at: DateTime<Utc>,
        duration_ms: u64,
    },
    Failed {
        error: String,
        completed_at: DateTime<Utc>,
    },
}

/// Sums a report. Fails on arithmetic overflow.
pub fn summarize(request: &GenerateReportRequest) -> Result<ReportSummary, JobError> {
    let mut total_items: u64 = 0;
    let mut gross_cents: i64 = 0;
    let mut revenue: HashMap<&str, i64> = HashMap::new();

    for line in &request.lines {
        let amount = line
            .unit_price_cents
            .checked_mul(i64::from(line.quantity))
            .ok_or_else(|| JobError::failed(format!("amount overflow on sku {}", line.sku)))?;

        total_items += u64::from(line.quantity);
        gross_cents = gross_cents
            .checked_add(amount)
            .ok_or_else(|| JobError::failed("gross total overflow"))?;

        let entry = revenue.entry(line.sku.as_str()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    let top_sku = revenue
        .iter()
        .max_by(|(sku_a, a), (sku_b, b)| a.cmp(b).then_with(|| sku_b.cmp(sku_a)))
        .map(|(sku, _)| sku.to_string());

    Ok(ReportSummary {
        store_id: request.store_id.clone(),
        total_items,
        gross_cents,
        distinct_skus: revenue.len(),
        top_sku,
    })
}

// =============================================================================
// Report Service
// =============================================================================

/// Pool statistics plus breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct ReportServiceStats {
    pub pool: PoolStats,
    pub breaker: CircuitBreakerSnapshot,
    pub tracked_reports: usize,
}

/// Default time a finished report stays queryable.
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(60 * 60);

pub struct ReportService {
    pool: WorkerPool<ReportSummary>,
    breaker: Arc<CircuitBreaker>,
    statuses: Arc<SafeMap<Uuid, ReportStatus>>,
    status_ttl: Duration,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportService")
            .field("pool", &self.pool)
            .field("breaker", &self.breaker)
            .field("status_ttl", &self.status_ttl)
            .finish_non_exhaustive()
    }
}

impl ReportService {
    pub fn new(pool: WorkerPoolConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            pool: WorkerPool::new(pool),
            breaker: Arc::new(CircuitBreaker::new("report-generation", breaker)),
            statuses: Arc::new(SafeMap::new()),
            status_ttl: DEFAULT_STATUS_TTL,
            collector: Mutex::new(None),
        }
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    pub fn status_ttl(&self) -> Duration {
        self.status_ttl
    }

    /// Starts the workers and the task that records finished reports.
    pub fn start(&self) -> GatewayResult<()> {
        self.pool.start()?;
        let mut results = self
            .pool
            .results()
            .ok_or_else(|| GatewayError::Internal("report results already taken".into()))?;

        let statuses = Arc::clone(&self.statuses);
        let handle = tokio::spawn(async move {
            while let Some(result) = results.next().await {
                record_result(&statuses, result);
            }
            debug!("Report results stream closed");
        });
        *self.collector.lock() = Some(handle);

        info!(workers = self.pool.config().workers, "Report service started");
        Ok(())
    }

    /// Queues a report. Fails fast when the pool is full or the breaker is open.
    pub fn submit(&self, request: GenerateReportRequest) -> GatewayResult<Uuid> {
        request.validate()?;

        if self.breaker.state() == CircuitState::Open {
            let snapshot = self.breaker.snapshot();
            return Err(GatewayError::Unavailable {
                message: format!("circuit breaker '{}' is open", snapshot.name),
                retry_after: Some(Duration::from_secs_f64(snapshot.reset_timeout_secs)),
            });
        }

        let breaker = Arc::clone(&self.breaker);
        let store_id = request.store_id.clone();
        let job = Job::new(async move {
            breaker
                .execute(|| async move { summarize(&request) })
                .await
                .map_err(|err| JobError::failed(err.to_string()))
        })
        .with_metadata("store_id", store_id);

        let job_id = job.id;
        self.statuses.set(
            job_id,
            ReportStatus::Queued {
                submitted_at: Utc::now(),
            },
        );

        if let Err(err) = self.pool.submit(job) {
            self.statuses.delete(&job_id);
            return Err(err.into());
        }
        Ok(job_id)
    }

    pub fn status(&self, job_id: &Uuid) -> Option<ReportStatus> {
        self.statuses.get(job_id)
    }

    /// Drops completed and failed statuses that finished at least
    /// `status_ttl` before `now`. Returns how many were removed.
    pub fn prune_statuses(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.status_ttl;
        let removed = self.statuses.retain(|_, status| match status {
            ReportStatus::Queued { .. } => true,
            ReportStatus::Completed { completed_at, .. }
            | ReportStatus::Failed { completed_at, .. } => match (now - *completed_at).to_std() {
                Ok(age) => age < ttl,
                Err(_) => true,
            },
        });
        if removed > 0 {
            debug!(removed, remaining = self.statuses.size(), "Pruned report statuses");
        }
        removed
    }

    pub fn stats(&self) -> ReportServiceStats {
        ReportServiceStats {
            pool: self.pool.stats(),
            breaker: self.breaker.snapshot(),
            tracked_reports: self.statuses.size(),
        }
    }

    /// Drains queued reports, then waits for their results to be recorded.
    pub async fn stop(&self) {
        self.pool.stop().await;
        let collector = self.collector.lock().take();
        if let Some(handle) = collector {
            if let Err(err) = handle.await {
                warn!(error = %err, "Report collector ended abnormally");
            }
        }
        info!("Report service stopped");
    }
}

fn record_result(statuses: &SafeMap<Uuid, ReportStatus>, result: JobResult<ReportSummary>) {
    let status = match result.result {
        Ok(summary) => ReportStatus::Completed {
            summary,
            completed_at: result.completed_at,
            duration_ms: result.duration.as_millis() as u64,
        },
        Err(err) => {
            warn!(job_id = %result.job_id, error = %err, "Report generation failed");
            ReportStatus::Failed {
                error: err.to_string(),
                completed_at: result.completed_at,
            }
        }
    };
    statuses.set(result.job_id, status);
}
