//! Sliding-window rate limiting for the credential endpoints

use crate::core::error::ErrorResponse;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Per-client request log over a sliding window
///
/// A request is allowed when fewer than `max_requests` requests from the same
/// client fall inside the last `window`.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<IpAddr, VecDeque<Instant>>>>,
    max_requests: usize,
    window: Duration,
    trust_proxy_headers: bool,
}

/// Rejection carrying the seconds until the oldest request leaves the window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimited {
    pub limit: usize,
    pub window_seconds: u64,
    pub retry_after: u64,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
            trust_proxy_headers: false,
        }
    }

    /// Key clients by `X-Forwarded-For` / `X-Real-IP`; only safe behind a proxy that sets them
    pub fn with_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    pub async fn check(&self, client: IpAddr) -> Result<(), RateLimited> {
        self.check_at(client, Instant::now()).await
    }

    async fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), RateLimited> {
        let mut requests = self.requests.lock().await;
        let log = requests.entry(client).or_default();

        while log
            .front()
            .map_or(false, |&t| now.saturating_duration_since(t) >= self.window)
        {
            log.pop_front();
        }

        if log.len() >= self.max_requests {
            let retry_after = log
                .front()
                .map(|&oldest| (self.window - now.saturating_duration_since(oldest)).as_secs())
                .unwrap_or(0)
                .max(1);
            return Err(RateLimited {
                limit: self.max_requests,
                window_seconds: self.window.as_secs(),
                retry_after,
            });
        }

        log.push_back(now);
        Ok(())
    }

    /// Forget clients with no request inside the window
    pub async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        let before = requests.len();
        requests.retain(|_, log| {
            log.retain(|&t| now.saturating_duration_since(t) < self.window);
            !log.is_empty()
        });
        before - requests.len()
    }
}

impl IntoResponse for RateLimited {
    fn into_response(self) -> Response {
        let body = ErrorResponse::with_details(
            "RateLimitExceeded".to_string(),
            format!(
                "Rate limit exceeded. Maximum {} requests per {} seconds allowed.",
                self.limit, self.window_seconds
            ),
            serde_json::json!({
                "limit": self.limit,
                "window_seconds": self.window_seconds,
                "retry_after": self.retry_after,
            }),
        );

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

/// Rate limiting middleware, installed with `from_fn_with_state(limiter, ..)`
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimited> {
    let client = client_ip(&request, limiter.trust_proxy_headers);
    if let Err(limited) = limiter.check(client).await {
        tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
        return Err(limited);
    }
    Ok(next.run(request).await)
}

/// Client address: proxy headers when trusted, then the socket, then loopback
pub fn client_ip(request: &Request, trust_proxy_headers: bool) -> IpAddr {
    let socket = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if !trust_proxy_headers {
        return socket.unwrap_or(IpAddr::from([127, 0, 0, 1]));
    }

    let headers = request.headers();
    let forwarded: Option<IpAddr> = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || -> Option<IpAddr> {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };

    forwarded
        .or_else(real_ip)
        .or(socket)
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::post, Router};
    use tower::util::ServiceExt;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[tokio::test]
    async fn test_limit_per_client() {
        let limiter = RateLimiter::new(2, 60);
        let now = Instant::now();

        assert!(limiter.check_at(ip(1), now).await.is_ok());
        assert!(limiter.check_at(ip(1), now).await.is_ok());
        let limited = limiter.check_at(ip(1), now).await.unwrap_err();
        assert_eq!(limited.limit, 2);
        assert!(limited.retry_after >= 1 && limited.retry_after <= 60);

        assert!(limiter.check_at(ip(2), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(1, 10);
        let start = Instant::now();

        assert!(limiter.check_at(ip(1), start).await.is_ok());
        assert!(limiter.check_at(ip(1), start + Duration::from_secs(5)).await.is_err());
        assert!(limiter.check_at(ip(1), start + Duration::from_secs(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let limiter = RateLimiter::new(5, 0);
        limiter.check(ip(1)).await.unwrap();
        assert_eq!(limiter.cleanup_expired().await, 1);
    }

    #[tokio::test]
    async fn test_middleware_returns_429_with_retry_after() {
        let limiter = RateLimiter::new(1, 60).with_proxy_headers(true);
        let app = Router::new()
            .route("/login", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let request = || {
            axum::http::Request::builder()
                .method("POST")
                .uri("/login")
                .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn test_client_ip_sources() {
        let mut req = axum::http::Request::builder()
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&req, true), "198.51.100.2".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&req, false), IpAddr::from([127, 0, 0, 1]));

        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 9], 40000))));
        assert_eq!(client_ip(&req, false), IpAddr::from([192, 0, 2, 9]));

        let req = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&req, true), IpAddr::from([127, 0, 0, 1]));
    }

    #[tokio::test]
    async fn test_spoofed_forwarded_for_does_not_reset_limit() {
        let limiter = RateLimiter::new(1, 60);
        let app = Router::new()
            .route("/login", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let request = |forwarded: &str| {
            let mut request = axum::http::Request::builder()
                .method("POST")
                .uri("/login")
                .header("X-Forwarded-For", forwarded)
                .body(Body::empty())
                .unwrap();
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 9], 40000))));
            request
        };

        let first = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request("203.0.113.2")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
