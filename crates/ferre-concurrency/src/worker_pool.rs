//! # Worker Pool
//!
//! Bounded background executor: a fixed set of tokio workers pulling from a
//! bounded job queue.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Worker Pool Lifecycle                            │
//! │                                                                         │
//! │   new() ──► start() ──► submit()* ──► stop().await                      │
//! │                │             │              │                           │
//! │                │             │              ├─ closes the job queue     │
//! │                │             │              ├─ workers drain what is    │
//! │                │             │              │  already queued           │
//! │                │             │              └─ returns once every       │
//! │                │             │                 worker has exited        │
//! │                │             ▼                                           │
//! │                │      try_send: Full ──► PoolFull (caller decides)      │
//! │                ▼                                                         │
//! │   N workers share one receiver:                                         │
//! │     recv job ──► run (panic isolated) ──► JobResult                     │
//! │                                              │                          │
//! │                     results queue full? ─────┴──► drop + warn           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dropped results are deliberate: a slow results consumer must never stall
//! the workers.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::counter::SafeCounter;
use crate::error::{ConcurrencyError, ConcurrencyResult, JobError};

// =============================================================================
// Configuration
// =============================================================================

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Job queue capacity.
    pub queue_capacity: usize,
    /// Results queue capacity.
    pub results_capacity: usize,
}

impl Default for WorkerPoolConfig {
    /// One worker per available core, queue twice that.
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_workers(workers)
    }
}

impl WorkerPoolConfig {
    /// `workers` workers with the default `2 × workers` queues.
    pub fn with_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            queue_capacity: workers * 2,
            results_capacity: workers * 2,
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn results_capacity(mut self, capacity: usize) -> Self {
        self.results_capacity = capacity.max(1);
        self
    }
}

// =============================================================================
// Jobs
// =============================================================================

type JobFuture<T> = Pin<Box<dyn Future<Output = Result<T, JobError>> + Send + 'static>>;

/// A unit of background work.
///
/// `priority` and `metadata` travel with the job for the submitter's
/// bookkeeping; the pool runs jobs in submission order.
pub struct Job<T> {
    pub id: Uuid,
    pub priority: i32,
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    task: JobFuture<T>,
}

impl<T> Job<T> {
    pub fn new<F>(task: F) -> Self
    where
        F: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            priority: 0,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            task: Box::pin(task),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("metadata", &self.metadata)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// What a finished job produced.
#[derive(Debug)]
pub struct JobResult<T> {
    pub job_id: Uuid,
    pub result: Result<T, JobError>,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

impl<T> JobResult<T> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Aggregate pool statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub jobs_total: i64,
    pub jobs_success: i64,
    pub jobs_error: i64,
    pub jobs_pending: i64,
    /// Percentage of accepted jobs that succeeded, 0 when none were accepted.
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    total: SafeCounter,
    success: SafeCounter,
    error: SafeCounter,
    pending: SafeCounter,
    dropped_results: SafeCounter,
}

// =============================================================================
// Worker Pool
// =============================================================================

struct Running<T> {
    job_tx: mpsc::Sender<Job<T>>,
    workers: Vec<JoinHandle<()>>,
}

/// Fixed-size pool of tokio workers with a bounded queue.
pub struct WorkerPool<T> {
    config: WorkerPoolConfig,
    running: Mutex<Option<Running<T>>>,
    results_rx: Mutex<Option<mpsc::Receiver<JobResult<T>>>>,
    counters: Arc<PoolCounters>,
}

impl<T> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("running", &self.running.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
            results_rx: Mutex::new(None),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawns the workers. Must be called from within a tokio runtime.
    pub fn start(&self) -> ConcurrencyResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(ConcurrencyError::PoolAlreadyRunning);
        }

        let (job_tx, job_rx) = mpsc::channel::<Job<T>>(self.config.queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.config.results_capacity);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let workers = (0..self.config.workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    job_rx.clone(),
                    result_tx.clone(),
                    self.counters.clone(),
                ))
            })
            .collect();

        *running = Some(Running { job_tx, workers });
        *self.results_rx.lock() = Some(result_rx);

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Worker pool started"
        );
        Ok(())
    }

    /// Queues a job without waiting. Returns the job id.
    pub fn submit(&self, job: Job<T>) -> ConcurrencyResult<Uuid> {
        let guard = self.running.lock();
        let Some(running) = guard.as_ref() else {
            return Err(ConcurrencyError::PoolNotRunning);
        };

        let job_id = job.id;
        // Count before the send so a fast worker never sees pending go negative.
        self.counters.pending.increment();
        match running.job_tx.try_send(job) {
            Ok(()) => {
                self.counters.total.increment();
                debug!(%job_id, "Job submitted");
                Ok(job_id)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.pending.decrement();
                Err(ConcurrencyError::PoolFull {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.pending.decrement();
                Err(ConcurrencyError::PoolNotRunning)
            }
        }
    }

    /// Takes the results stream. Only the first caller after each `start`
    /// gets it. The stream ends once the pool has stopped.
    pub fn results(&self) -> Option<ReceiverStream<JobResult<T>>> {
        self.results_rx.lock().take().map(ReceiverStream::new)
    }

    /// Closes the queue and waits for every worker to finish what was
    /// already queued. A no-op on a pool that is not running.
    pub async fn stop(&self) {
        let taken = self.running.lock().take();
        let Some(Running { job_tx, workers }) = taken else {
            return;
        };
        drop(job_tx);

        info!(workers = workers.len(), "Worker pool stopping");
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(?e, "Worker task ended abnormally");
            }
        }
        info!(
            jobs_total = self.counters.total.get(),
            dropped_results = self.counters.dropped_results.get(),
            "Worker pool stopped"
        );
    }

    pub fn stats(&self) -> PoolStats {
        let total = self.counters.total.get();
        let success = self.counters.success.get();
        let success_rate = if total > 0 {
            success as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        PoolStats {
            workers: self.config.workers,
            jobs_total: total,
            jobs_success: success,
            jobs_error: self.counters.error.get(),
            jobs_pending: self.counters.pending.get(),
            success_rate,
        }
    }
}

async fn worker_loop<T: Send + 'static>(
    worker_id: usize,
    job_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job<T>>>>,
    result_tx: mpsc::Sender<JobResult<T>>,
    counters: Arc<PoolCounters>,
) {
    debug!(worker_id, "Worker started");

    loop {
        let job = {
            let mut rx = job_rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };
        counters.pending.decrement();

        let job_id = job.id;
        let started = Instant::now();
        let result = match AssertUnwindSafe(job.task).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
        };

        match &result {
            Ok(_) => {
                counters.success.increment();
            }
            Err(e) => {
                counters.error.increment();
                debug!(worker_id, %job_id, error = %e, "Job failed");
            }
        }

        let job_result = JobResult {
            job_id,
            result,
            duration: started.elapsed(),
            completed_at: Utc::now(),
        };

        match result_tx.try_send(job_result) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counters.dropped_results.increment();
                warn!(worker_id, %job_id, "Results queue full, dropping job result");
            }
            // Nobody is listening for results.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    debug!(worker_id, "Worker stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
