//! Authentication middleware

use crate::api::handlers::AppState;
use crate::auth::jwt::validate_token;
use crate::auth::models::SubjectKind;
use crate::core::error::{ApiError, Result};
use crate::db::models::ROLE_ADMIN;
use crate::db::repository::Repository;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Name of the cookie carrying the access token
pub const SESSION_COOKIE: &str = "session";

/// Extension to store the authenticated principal in the request
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub kind: SubjectKind,
    /// Role of a staff user; always read from the database
    pub role: Option<String>,
    pub session_id: String,
    pub name: String,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.kind == SubjectKind::User
    }

    pub fn is_admin(&self) -> bool {
        self.is_staff() && self.role.as_deref() == Some(ROLE_ADMIN)
    }

    pub fn require_staff(&self) -> Result<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ApiError::PermissionDenied("Staff account required".to_string()))
        }
    }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::PermissionDenied("Administrator role required".to_string()))
        }
    }

    pub fn require_reader(&self) -> Result<()> {
        if self.kind == SubjectKind::Reader {
            Ok(())
        } else {
            Err(ApiError::PermissionDenied("Reader account required".to_string()))
        }
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Token from the Authorization header, the session cookie or `?token=`
pub fn extract_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    from_header
        .or_else(|| cookie_value(request.headers(), SESSION_COOKIE))
        .or_else(|| {
            request.uri().query().and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(k, _)| k == "token")
                    .map(|(_, v)| v.to_string())
            })
        })
        .filter(|t| !t.is_empty())
}

/// Resolve a token into the principal it was issued to
pub async fn resolve_principal(state: &AppState, token: &str) -> Result<AuthUser> {
    let claims = validate_token(token, &state.auth.jwt_secret)?;

    let session = state
        .sessions
        .lookup(&claims.sid)
        .await?
        .ok_or_else(|| ApiError::AuthenticationError("Session expired or revoked".to_string()))?;
    if session.subject_id != claims.sub || session.kind != claims.kind {
        return Err(ApiError::AuthenticationError("Session does not match token".to_string()));
    }

    match claims.kind {
        SubjectKind::User => {
            let user = state
                .user_repo
                .find_by_id(&claims.sub)
                .await?
                .ok_or_else(|| ApiError::AuthenticationError("User not found".to_string()))?;
            Ok(AuthUser {
                id: user.id,
                kind: SubjectKind::User,
                role: Some(user.role),
                session_id: claims.sid,
                name: user.username,
            })
        }
        SubjectKind::Reader => {
            let reader = state
                .reader_repo
                .find_by_id(&claims.sub)
                .await?
                .ok_or_else(|| ApiError::AuthenticationError("Reader not found".to_string()))?;
            Ok(AuthUser {
                id: reader.id,
                kind: SubjectKind::Reader,
                role: None,
                session_id: claims.sid,
                name: reader.email,
            })
        }
    }
}

/// Authentication middleware
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_token(&request) {
        Some(t) => t,
        None => {
            return ApiError::AuthenticationError("Missing authentication token".to_string())
                .into_response();
        }
    };

    let user = match resolve_principal(&state, &token).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    tracing::debug!(subject = %user.id, kind = user.kind.as_str(), "Request authenticated");
    request.extensions_mut().insert(user);

    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::AuthenticationError("User not authenticated".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = axum::http::Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_token_sources() {
        let req = request("/api/me", &[("Authorization", "Bearer abc")]);
        assert_eq!(extract_token(&req).as_deref(), Some("abc"));

        let req = request("/api/me", &[("Cookie", "theme=dark; session=xyz")]);
        assert_eq!(extract_token(&req).as_deref(), Some("xyz"));

        let req = request("/api/notifications/ws?token=q%2B1", &[]);
        assert_eq!(extract_token(&req).as_deref(), Some("q+1"));

        let req = request("/api/me", &[("Authorization", "Basic abc")]);
        assert!(extract_token(&req).is_none());
    }

    #[test]
    fn test_header_wins_over_cookie() {
        let req = request(
            "/api/me?token=query",
            &[("Authorization", "Bearer header"), ("Cookie", "session=cookie")],
        );
        assert_eq!(extract_token(&req).as_deref(), Some("header"));
    }

    #[test]
    fn test_role_checks() {
        let mut user = AuthUser {
            id: "u1".into(),
            kind: SubjectKind::User,
            role: Some("editor".into()),
            session_id: "s1".into(),
            name: "editor".into(),
        };
        assert!(user.require_staff().is_ok());
        assert!(user.require_admin().is_err());
        assert!(user.require_reader().is_err());

        user.role = Some(ROLE_ADMIN.into());
        assert!(user.require_admin().is_ok());

        user.kind = SubjectKind::Reader;
        assert!(user.require_admin().is_err());
        assert!(user.require_reader().is_ok());
    }
}
