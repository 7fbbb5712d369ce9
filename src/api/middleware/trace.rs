use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// HTTP header name for trace ID
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

const MAX_INCOMING_TRACE_ID_LEN: usize = 64;

tokio::task_local! {
    static CURRENT_TRACE_ID: String;
}

/// Trace ID of the request being handled on this task, if any
///
/// Error responses use it so the body and the `X-Trace-Id` header agree.
pub fn current_trace_id() -> Option<String> {
    CURRENT_TRACE_ID.try_with(|id| id.clone()).ok()
}

/// Reuse a caller-supplied trace ID when it is short and printable
fn incoming_trace_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_INCOMING_TRACE_ID_LEN
                && id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
        .map(str::to_string)
}

/// Middleware that assigns a trace ID to each request
///
/// The trace ID is:
/// - Taken from an incoming `X-Trace-Id` header or generated as a UUID v4
/// - Added to the request extensions for access by handlers
/// - Recorded on the request span so every log line carries it
/// - Echoed in the response headers and in error bodies
pub async fn trace_id_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = incoming_trace_id(&request).unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let mut response = CURRENT_TRACE_ID
        .scope(
            trace_id.clone(),
            async move {
                let response = next.run(request).await;
                tracing::info!(status = %response.status(), "Request completed");
                response
            }
            .instrument(span),
        )
        .await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Extension type for storing trace ID in request extensions
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ApiError;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use tower::util::ServiceExt;

    async fn echo_trace_id(request: Request<Body>) -> impl IntoResponse {
        let trace_id = request
            .extensions()
            .get::<TraceId>()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default();
        (StatusCode::OK, trace_id)
    }

    fn app() -> Router {
        Router::new()
            .route("/test", get(echo_trace_id))
            .route(
                "/fail",
                get(|| async { ApiError::NotFound("Book b1 not found".into()) }),
            )
            .layer(middleware::from_fn(trace_id_middleware))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_generated_id_matches_handler_view() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        let header = response
            .headers()
            .get(TRACE_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(body_string(response).await, header);
    }

    #[tokio::test]
    async fn test_incoming_id_is_reused() {
        let request = Request::builder()
            .uri("/test")
            .header(TRACE_ID_HEADER, "client-abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.headers().get(TRACE_ID_HEADER).unwrap(), "client-abc-123");

        let request = Request::builder()
            .uri("/test")
            .header(TRACE_ID_HEADER, "bad id with spaces")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_ne!(response.headers().get(TRACE_ID_HEADER).unwrap(), "bad id with spaces");
    }

    #[tokio::test]
    async fn test_error_body_carries_request_trace_id() {
        let request = Request::builder().uri("/fail").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let header = response
            .headers()
            .get(TRACE_ID_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["trace_id"], header);
    }

    #[test]
    fn test_no_trace_id_outside_requests() {
        assert!(current_trace_id().is_none());
    }
}
