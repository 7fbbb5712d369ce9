use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Policy for a JSON API that also serves uploaded images
const CONTENT_SECURITY_POLICY: &str =
    "default-src 'none'; img-src 'self' data:; connect-src 'self'; frame-ancestors 'none'; base-uri 'none';";

/// Configuration for security headers
#[derive(Clone, Debug)]
pub struct SecurityHeadersConfig {
    /// Send `Strict-Transport-Security`
    pub enable_hsts: bool,
    pub hsts_max_age: u64,
}

impl SecurityHeadersConfig {
    pub fn new(enable_hsts: bool, hsts_max_age: u64) -> Self {
        Self {
            enable_hsts,
            hsts_max_age,
        }
    }
}

/// Security headers middleware, installed with `from_fn_with_state(config, ..)`
///
/// Adds `nosniff`, frame denial, a restrictive CSP and a referrer policy to
/// every response, plus HSTS when enabled.
pub async fn security_headers_middleware(
    State(config): State<SecurityHeadersConfig>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );

    if config.enable_hsts {
        let hsts = format!("max-age={}; includeSubDomains", config.hsts_max_age);
        if let Ok(value) = HeaderValue::from_str(&hsts) {
            headers.insert(header::STRICT_TRANSPORT_SECURITY, value);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::util::ServiceExt;

    fn app(config: SecurityHeadersConfig) -> Router {
        Router::new()
            .route("/test", get(|| async { "OK" }))
            .layer(middleware::from_fn_with_state(
                config,
                security_headers_middleware,
            ))
    }

    fn request() -> Request {
        axum::http::Request::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_headers_without_hsts() {
        let response = app(SecurityHeadersConfig::new(false, 0))
            .oneshot(request())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers.get("X-Content-Type-Options").unwrap(), "nosniff");
        assert_eq!(headers.get("X-Frame-Options").unwrap(), "DENY");
        assert_eq!(headers.get("Referrer-Policy").unwrap(), "no-referrer");
        assert!(headers
            .get("Content-Security-Policy")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("frame-ancestors 'none'"));
        assert!(!headers.contains_key("Strict-Transport-Security"));
    }

    #[tokio::test]
    async fn test_hsts_max_age() {
        let response = app(SecurityHeadersConfig::new(true, 86400))
            .oneshot(request())
            .await
            .unwrap();

        let hsts = response
            .headers()
            .get("Strict-Transport-Security")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(hsts, "max-age=86400; includeSubDomains");
    }
}
