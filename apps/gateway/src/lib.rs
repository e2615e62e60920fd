//! # Ferre Gateway
//!
//! HTTP front door for Ferre POS: every request passes the admission
//! middleware before reaching a handler.
//!
//! ## Routes
//! ```text
//! GET    /health
//! GET    /api/v1/admin/rate-limit/stats
//! GET    /api/v1/admin/rate-limit/custom?key=...
//! POST   /api/v1/admin/rate-limit/custom          { key, limit, burst, window_secs? }
//! DELETE /api/v1/admin/rate-limit/custom?key=...
//! DELETE /api/v1/admin/rate-limit/blocks/{ip}
//! POST   /api/v1/reports/generate                 { store_id, lines }
//! GET    /api/v1/reports/status/{job_id}
//! GET    /api/v1/reports/stats
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod reports;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use ferre_ratelimit::RateLimiter;

pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use reports::ReportService;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub reports: ReportService,
}

/// Builds the router with admission applied to every route.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the middleware needs the peer address.
pub fn build_router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/rate-limit/stats", get(handlers::rate_limit_stats))
        .route(
            "/rate-limit/custom",
            get(handlers::get_custom_limit)
                .post(handlers::set_custom_limit)
                .delete(handlers::remove_custom_limit),
        )
        .route("/rate-limit/blocks/{ip}", delete(handlers::unblock_ip));

    let reports = Router::new()
        .route("/generate", post(handlers::generate_report))
        .route("/status/{job_id}", get(handlers::report_status))
        .route("/stats", get(handlers::report_stats));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/v1/admin", admin)
        .nest("/api/v1/reports", reports)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .with_state(state)
}
