//! # Background Sweeper
//!
//! ```text
//! supervisor task
//!   └─ loop: spawn sweep loop ──► joined
//!              │                    ├─ Ok       → shutdown requested, stop
//!              │                    └─ panicked → log, spawn again
//!              ▼
//!        every cleanup_interval: limiter.sweep()
//! ```
//!
//! A panic inside one sweep is confined to the inner task, so it never takes
//! the process or the supervisor down with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::MAX_DURATION_SECS;
use crate::limiter::RateLimiter;

/// Spawns periodic cleanup tasks.
pub struct Sweeper;

impl Sweeper {
    /// Sweeps `limiter` every `cleanup_interval` of its current config.
    pub fn spawn(limiter: Arc<RateLimiter>) -> SweeperHandle {
        let interval = limiter.config().cleanup_interval();
        Self::spawn_with(interval, move || {
            limiter.sweep();
        })
    }

    /// Runs `sweep` every `interval`, starting one interval from now.
    /// `interval` is capped at [`MAX_DURATION_SECS`].
    pub fn spawn_with<F>(interval: Duration, sweep: F) -> SweeperHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let interval = interval.min(Duration::from_secs(MAX_DURATION_SECS));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(supervise(interval, Arc::new(sweep), shutdown_rx));
        info!(interval_secs = interval.as_secs(), "Rate limit sweeper started");

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owner of a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Sweeper task ended abnormally");
        }
        info!("Rate limit sweeper stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn supervise<F>(interval: Duration, sweep: Arc<F>, shutdown: watch::Receiver<bool>)
where
    F: Fn() + Send + Sync + 'static,
{
    loop {
        let run = tokio::spawn(sweep_loop(interval, Arc::clone(&sweep), shutdown.clone()));

        match run.await {
            Ok(()) => return,
            Err(err) if err.is_panic() => {
                error!(error = %err, "Rate limit sweep panicked, restarting");
                if *shutdown.borrow() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "Rate limit sweep cancelled");
                return;
            }
        }
    }
}

async fn sweep_loop<F>(interval: Duration, sweep: Arc<F>, mut shutdown: watch::Receiver<bool>)
where
    F: Fn() + Send + Sync + 'static,
{
    let now = Instant::now();
    let mut ticker = interval_at(now.checked_add(interval).unwrap_or(now), interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
