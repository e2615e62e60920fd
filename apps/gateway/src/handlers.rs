//! HTTP handlers: health, rate-limit administration and reports.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use ferre_core::LimiterKey;
use ferre_ratelimit::{BlockEntry, LimitInfo, RateLimiterStats};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::reports::{GenerateReportRequest, ReportServiceStats, ReportStatus};
use crate::AppState;

// =============================================================================
// Health
// =============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let reports = state.reports.stats();
    Json(json!({
        "status": "ok",
        "time": Utc::now(),
        "report_breaker": reports.breaker.state,
    }))
}

// =============================================================================
// Rate Limit Administration
// =============================================================================

#[derive(Debug, Serialize)]
pub struct RateLimitOverview {
    pub stats: RateLimiterStats,
    pub blocked: Vec<BlockEntry>,
}

pub async fn rate_limit_stats(State(state): State<Arc<AppState>>) -> Json<RateLimitOverview> {
    Json(RateLimitOverview {
        stats: state.limiter.stats(),
        blocked: state.limiter.blocked_ips(),
    })
}

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct CustomLimitRequest {
    pub key: String,
    pub limit: u32,
    #[serde(default)]
    pub burst: u32,
    /// Counting window; the configured default when absent.
    #[serde(default)]
    pub window_secs: Option<u64>,
}

fn limiter_key(raw: &str) -> GatewayResult<LimiterKey> {
    if raw.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("key is required".into()));
    }
    Ok(LimiterKey::from_raw(raw.trim()))
}

pub async fn get_custom_limit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> GatewayResult<Json<LimitInfo>> {
    let key = limiter_key(&query.key)?;
    Ok(Json(state.limiter.get_limit_info(&key)))
}

pub async fn set_custom_limit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CustomLimitRequest>,
) -> GatewayResult<Json<LimitInfo>> {
    let key = limiter_key(&body.key)?;
    state.limiter.set_custom_limit_with_window(
        key.clone(),
        body.limit,
        body.burst,
        body.window_secs.map(Duration::from_secs),
    )?;
    info!(key = %key.as_str(), limit = body.limit, burst = body.burst, "Custom limit set");
    Ok(Json(state.limiter.get_limit_info(&key)))
}

pub async fn remove_custom_limit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> GatewayResult<StatusCode> {
    let key = limiter_key(&query.key)?;
    if state.limiter.remove_custom_limit(&key) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(format!(
            "no custom limit for {}",
            key.as_str()
        )))
    }
}

pub async fn unblock_ip(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> GatewayResult<StatusCode> {
    if state.limiter.unblock(&ip) {
        info!(ip = %ip, "IP unblocked by administrator");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(format!("{} is not blocked", ip)))
    }
}

// =============================================================================
// Reports
// =============================================================================

pub async fn generate_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateReportRequest>,
) -> GatewayResult<impl IntoResponse> {
    let job_id = state.reports.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "status": "queued" })),
    ))
}

pub async fn report_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> GatewayResult<Json<ReportStatus>> {
    let job_id: Uuid = job_id
        .parse()
        .map_err(|_| GatewayError::InvalidRequest(format!("invalid job id: {}", job_id)))?;
    state
        .reports
        .status(&job_id)
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("report {}", job_id)))
}

pub async fn report_stats(State(state): State<Arc<AppState>>) -> Json<ReportServiceStats> {
    Json(state.reports.stats())
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;
    use ferre_concurrency::{CircuitBreakerConfig, WorkerPoolConfig};
    use ferre_core::RequestDescriptor;
    use ferre_ratelimit::{Algorithm, RateLimitConfig, RateLimiter};

    use super::*;
    use crate::reports::{ReportService, SaleLine};

    fn state(config: RateLimitConfig) -> Arc<AppState> {
        Arc::new(AppState {
            limiter: Arc::new(RateLimiter::new(config).unwrap()),
            reports: ReportService::new(
                WorkerPoolConfig::with_workers(1).queue_capacity(2),
                CircuitBreakerConfig::default(),
            ),
        })
    }

    #[tokio::test]
    async fn test_custom_limit_lifecycle() {
        let state = state(RateLimitConfig::default());
        let key = "ip:10.0.0.9:GET:/api/v1/products".to_string();

        let Json(info) = set_custom_limit(
            State(state.clone()),
            Json(CustomLimitRequest {
                key: key.clone(),
                limit: 7,
                burst: 2,
                window_secs: Some(120),
            }),
        )
        .await
        .unwrap();
        assert_eq!(info.limit, 7);
        assert_eq!(info.burst, 2);
        assert_eq!(info.window_secs, 120);

        let Json(info) = get_custom_limit(State(state.clone()), Query(KeyQuery { key: key.clone() }))
            .await
            .unwrap();
        assert_eq!(info.limit, 7);

        let status = remove_custom_limit(State(state.clone()), Query(KeyQuery { key: key.clone() }))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = remove_custom_limit(State(state), Query(KeyQuery { key }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_custom_limit_is_bad_request() {
        let state = state(RateLimitConfig::default());

        let err = set_custom_limit(
            State(state.clone()),
            Json(CustomLimitRequest {
                key: "global".into(),
                limit: 0,
                burst: 0,
                window_secs: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = set_custom_limit(
            State(state.clone()),
            Json(CustomLimitRequest {
                key: "global".into(),
                limit: 5,
                burst: 0,
                window_secs: Some(0),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = get_custom_limit(State(state), Query(KeyQuery { key: "  ".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unblock_ip() {
        let state = state(RateLimitConfig {
            algorithm: Algorithm::SlidingWindow,
            default_limit: 1,
            burst_limit: 0,
            block_on_violation: true,
            ..RateLimitConfig::default()
        });

        let err = unblock_ip(State(state.clone()), Path("203.0.113.9".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let request = RequestDescriptor::new("203.0.113.9", "GET", "/api/v1/products");
        for _ in 0..6 {
            state.limiter.check(&request);
        }
        assert!(state.limiter.is_blocked("203.0.113.9"));

        let Json(overview) = rate_limit_stats(State(state.clone())).await;
        assert_eq!(overview.blocked.len(), 1);

        let status = unblock_ip(State(state.clone()), Path("203.0.113.9".into()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!state.limiter.is_blocked("203.0.113.9"));
    }

    #[tokio::test]
    async fn test_report_endpoints() {
        let state = state(RateLimitConfig::default());
        state.reports.start().unwrap();

        let submitted = generate_report(
            State(state.clone()),
            Json(GenerateReportRequest {
                store_id: "store-007".into(),
                lines: vec![SaleLine {
                    sku: "TORNILLO-8".into(),
                    quantity: 40,
                    unit_price_cents: 35,
                }],
            }),
        )
        .await;
        let response = match submitted {
            Ok(accepted) => accepted.into_response(),
            Err(err) => panic!("report rejected: {}", err),
        };
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let err = report_status(State(state.clone()), Path("not-a-uuid".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = report_status(State(state.clone()), Path(Uuid::new_v4().to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        state.reports.stop().await;
        let Json(stats) = report_stats(State(state)).await;
        assert_eq!(stats.pool.jobs_total, 1);
        assert_eq!(stats.tracked_reports, 1);
    }
}
