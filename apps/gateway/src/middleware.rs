//! # Admission Middleware
//!
//! ```text
//! request ──► client_ip() ──► RequestDescriptor ──► limiter.check()
//!                                                     │
//!                      denied ◄───────────────────────┤
//!                  403 / 429 + JSON                   │ allowed
//!                                                     ▼
//!                                         limiter.check_user() (if authenticated)
//!                                                     │ allowed
//!                                                     ▼
//!                    next.run() + X-RateLimit-* headers (tighter quota)
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ferre_core::{AdmissionDecision, DenyReason, RequestDescriptor};

use crate::error::{error_body, retry_after_secs};
use crate::AppState;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_RATELIMIT_WINDOW: HeaderName = HeaderName::from_static("x-ratelimit-window");

/// Identity attached by an upstream authentication layer.
///
/// Admission only trusts this extension, never client-supplied headers, for
/// user identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub user_type: Option<String>,
}

/// Rate-limits every request passing through it.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let descriptor = describe(&request, peer.ip());

    let decision = state.limiter.check(&descriptor);
    if !decision.allowed {
        return deny_response(&decision);
    }

    let user_decision = state.limiter.check_user(&descriptor);
    if let Some(user_decision) = &user_decision {
        if !user_decision.allowed {
            return deny_response(user_decision);
        }
    }

    let mut response = next.run(request).await;
    apply_headers(
        response.headers_mut(),
        tighter(&decision, user_decision.as_ref()),
    );
    response
}

/// The decision with fewer requests remaining. Ties and quota-less user
/// decisions keep the IP decision.
pub fn tighter<'a>(
    ip: &'a AdmissionDecision,
    user: Option<&'a AdmissionDecision>,
) -> &'a AdmissionDecision {
    let Some(user_quota) = user.and_then(|u| u.quota.as_ref()) else {
        return ip;
    };
    match &ip.quota {
        Some(ip_quota) if ip_quota.remaining <= user_quota.remaining => ip,
        _ => user.unwrap_or(ip),
    }
}

/// The admission facts for `request`.
pub fn describe(request: &Request, peer: IpAddr) -> RequestDescriptor {
    let ip = client_ip(request.headers(), peer);
    let descriptor = RequestDescriptor::new(ip, request.method().as_str(), request.uri().path());

    match request.extensions().get::<AuthenticatedUser>() {
        Some(user) => descriptor.with_user(user.id.clone(), user.user_type.as_deref()),
        None => descriptor,
    }
}

/// Client address: first valid IP in `X-Forwarded-For`, then `X-Real-IP`,
/// then `X-Client-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> String {
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .split(',')
                .map(str::trim)
                .find_map(|candidate| candidate.parse::<IpAddr>().ok())
        })
    {
        return ip.to_string();
    }

    for name in ["x-real-ip", "x-client-ip"] {
        if let Some(ip) = headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok())
        {
            return ip.to_string();
        }
    }

    peer.to_string()
}

/// Adds `X-RateLimit-*` headers for a checked decision. Bypass decisions
/// carry no quota and add nothing.
pub fn apply_headers(headers: &mut HeaderMap, decision: &AdmissionDecision) {
    if let Some(quota) = &decision.quota {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
        headers.insert(
            X_RATELIMIT_RESET,
            HeaderValue::from(quota.reset_time.timestamp()),
        );
        headers.insert(X_RATELIMIT_WINDOW, HeaderValue::from(quota.window.as_secs()));
    }

    if !decision.allowed {
        if let Some(retry_after) = decision.retry_after {
            headers.insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
    }
}

/// 403 for blacklisted IPs, 429 otherwise, with the JSON error envelope.
pub fn deny_response(decision: &AdmissionDecision) -> Response {
    let reason = decision.reason.unwrap_or(DenyReason::RateLimited);
    let status = match reason {
        DenyReason::Blacklisted => StatusCode::FORBIDDEN,
        DenyReason::RateLimited | DenyReason::TemporarilyBlocked => StatusCode::TOO_MANY_REQUESTS,
    };

    let body = error_body(reason.code(), reason.message(), decision.retry_after);
    let mut response = (status, Json(body)).into_response();
    apply_headers(response.headers_mut(), decision);
    response
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use chrono::{TimeZone, Utc};
    use ferre_core::Quota;

    use super::*;

    fn peer() -> IpAddr {
        "192.168.1.50".parse().unwrap()
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn quota(remaining: u32) -> Quota {
        Quota {
            limit: 100,
            remaining,
            reset_time: Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
            window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let map = headers(&[
            ("x-forwarded-for", "not-an-ip, 203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&map, peer()), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_fallback_order() {
        let map = headers(&[("x-real-ip", "198.51.100.2"), ("x-client-ip", "198.51.100.3")]);
        assert_eq!(client_ip(&map, peer()), "198.51.100.2");

        let map = headers(&[("x-real-ip", "garbage"), ("x-client-ip", "2001:db8::1")]);
        assert_eq!(client_ip(&map, peer()), "2001:db8::1");

        assert_eq!(client_ip(&HeaderMap::new(), peer()), "192.168.1.50");
    }

    #[test]
    fn test_describe_uses_authenticated_user() {
        let mut request = axum::http::Request::builder()
            .method("post")
            .uri("/api/v1/ventas?page=2")
            .body(Body::empty())
            .unwrap();
        let anonymous = describe(&request, peer());
        assert_eq!(anonymous.method, "POST");
        assert_eq!(anonymous.path, "/api/v1/ventas");
        assert!(anonymous.user_id.is_none());

        request.extensions_mut().insert(AuthenticatedUser {
            id: "42".into(),
            user_type: Some("cajero".into()),
        });
        let user = describe(&request, peer());
        assert_eq!(user.user_id.as_deref(), Some("42"));
        assert_eq!(user.user_type.as_deref(), Some("cajero"));
        assert_eq!(user.limiter_key().as_str(), "user:42:POST:/api/v1/ventas");
    }

    #[test]
    fn test_headers_for_admitted_request() {
        let mut map = HeaderMap::new();
        apply_headers(&mut map, &AdmissionDecision::admitted(quota(99)));

        assert_eq!(map[&X_RATELIMIT_LIMIT], "100");
        assert_eq!(map[&X_RATELIMIT_REMAINING], "99");
        assert_eq!(map[&X_RATELIMIT_RESET], "1700000060");
        assert_eq!(map[&X_RATELIMIT_WINDOW], "60");
        assert!(map.get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_headers_follow_tighter_quota() {
        let ip = AdmissionDecision::admitted(quota(80));
        let user = AdmissionDecision::admitted(Quota {
            limit: 10,
            ..quota(3)
        });

        let mut map = HeaderMap::new();
        apply_headers(&mut map, tighter(&ip, Some(&user)));
        assert_eq!(map[&X_RATELIMIT_LIMIT], "10");
        assert_eq!(map[&X_RATELIMIT_REMAINING], "3");

        let roomy = AdmissionDecision::admitted(quota(95));
        assert_eq!(tighter(&ip, Some(&roomy)), &ip);
        assert_eq!(tighter(&ip, None), &ip);

        let bypass = AdmissionDecision::bypass();
        assert_eq!(tighter(&bypass, Some(&user)), &user);
        assert_eq!(tighter(&ip, Some(&bypass)), &ip);
    }

    #[test]
    fn test_bypass_adds_no_headers() {
        let mut map = HeaderMap::new();
        apply_headers(&mut map, &AdmissionDecision::bypass());
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let decision = AdmissionDecision::denied(
            DenyReason::RateLimited,
            Some(quota(0)),
            Some(Duration::from_millis(2500)),
        );
        let response = deny_response(&decision);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "0");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["code"], "rate_limited");
        assert_eq!(body["error"]["retry_after"], 3);
        assert!(body["error"].get("algorithm").is_none());
    }

    #[tokio::test]
    async fn test_blacklisted_response() {
        let decision = AdmissionDecision::denied(DenyReason::Blacklisted, None, None);
        let response = deny_response(&decision);

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"]["code"], "blacklisted");
        assert!(body["error"]["retry_after"].is_null());
    }

    #[test]
    fn test_blocked_response_is_429() {
        let decision = AdmissionDecision::denied(
            DenyReason::TemporarilyBlocked,
            None,
            Some(Duration::from_secs(900)),
        );
        let response = deny_response(&decision);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");
    }
}
