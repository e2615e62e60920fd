//! # Ferre Gateway
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Gateway Process                                │
//! │                                                                         │
//! │  client ───► Axum (8080) ───► rate_limit middleware ───► handlers     │
//! │                                      │                       │          │
//! │                                      ▼                       ▼          │
//! │                               RateLimiter ◄── Sweeper   ReportService  │
//! │                                                (5 min)  (pool+breaker) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use ferre_gateway::{build_router, AppState, GatewayConfig, ReportService};
use ferre_ratelimit::{RateLimitConfig, RateLimiter, Sweeper};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Ferre gateway...");

    let config = GatewayConfig::load().context("loading gateway configuration")?;
    let rate_limits = RateLimitConfig::load(config.rate_limit_config.clone())
        .context("loading rate limit configuration")?;
    info!(
        bind = %config.bind_addr,
        algorithm = %rate_limits.algorithm,
        workers = config.report_workers,
        "Configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(rate_limits).context("building rate limiter")?);
    let sweeper = Sweeper::spawn(Arc::clone(&limiter));

    let reports = ReportService::new(config.worker_pool(), config.circuit_breaker())
        .with_status_ttl(config.report_status_ttl());
    reports.start().context("starting report workers")?;

    let state = Arc::new(AppState { limiter, reports });
    let status_pruner = {
        let state = Arc::clone(&state);
        Sweeper::spawn_with(config.report_status_ttl(), move || {
            state.reports.prune_statuses(Utc::now());
        })
    };
    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving HTTP")?;

    state.reports.stop().await;
    status_pruner.shutdown().await;
    sweeper.shutdown().await;

    info!("Gateway shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
