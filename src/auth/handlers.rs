//! Authentication API handlers

use crate::api::handlers::AppState;
use crate::api::models::{validate_registration, SuccessResponse};
use crate::auth::jwt::{generate_token, Claims};
use crate::auth::middleware::{AuthUser, SESSION_COOKIE};
use crate::auth::models::{
    LoginRequest, LoginResponse, MfaChallengeResponse, MfaVerifyRequest, PrincipalInfo,
    ReaderLoginRequest, RegisterRequest, SubjectKind,
};
use crate::auth::password::{hash_password_with_cost, verify_password};
use crate::core::error::{ApiError, Result};
use crate::core::mailer::Email;
use crate::core::notifications;
use crate::core::utils::now_timestamp;
use crate::db::models::Reader;
use crate::db::repository::Repository;
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

fn invalid_credentials() -> ApiError {
    ApiError::AuthenticationError("Invalid credentials".to_string())
}

fn session_cookie(token: &str, max_age: u64) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE, token, max_age
    ))
    .map_err(|e| ApiError::InvalidRequest(format!("Invalid cookie value: {}", e)))
}

/// Open a session for the principal and sign a token referencing it
async fn issue_session(
    state: &AppState,
    principal: PrincipalInfo,
    status: StatusCode,
) -> Result<Response> {
    let settings = &state.auth;
    let session_id = state
        .sessions
        .create(principal.kind, &principal.id, settings.session_ttl)
        .await?;

    // The token never outlives its session
    let expires_in = settings.token_ttl.min(settings.session_ttl);
    let claims = Claims::new(
        &principal.id,
        principal.kind,
        principal.role.as_deref(),
        &session_id,
        expires_in,
    )?;
    let token = generate_token(&claims, &settings.jwt_secret)?;
    let cookie = session_cookie(&token, expires_in)?;

    tracing::info!(
        subject = %principal.id,
        kind = principal.kind.as_str(),
        session_id = %session_id,
        "Session opened"
    );

    let body = LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in,
        principal,
    };
    Ok((status, [(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Handler for POST /api/auth/login - Staff login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response> {
    tracing::info!(username = %req.username, "Login attempt");

    let user = state
        .user_repo
        .find_by_username(req.username.trim())
        .await?
        .ok_or_else(invalid_credentials)?;

    if !verify_password(&req.password, &user.password_hash)? {
        tracing::warn!(username = %req.username, "Invalid password");
        return Err(invalid_credentials());
    }

    if user.mfa_enabled != 0 {
        let challenge = state.mfa.start(&user.id).await?;
        state
            .mailer
            .send(Email::login_code(&user.email, &challenge.code, challenge.expires_in))
            .await?;

        return Ok(Json(MfaChallengeResponse {
            mfa_required: true,
            challenge_id: challenge.challenge_id,
            expires_in: challenge.expires_in,
        })
        .into_response());
    }

    issue_session(&state, PrincipalInfo::from(&user), StatusCode::OK).await
}

/// Handler for POST /api/auth/mfa/verify - Second login step
pub async fn verify_mfa(
    State(state): State<AppState>,
    Json(req): Json<MfaVerifyRequest>,
) -> Result<Response> {
    let user_id = state.mfa.verify(&req.challenge_id, &req.code).await?;

    let user = state
        .user_repo
        .find_by_id(&user_id)
        .await?
        .ok_or_else(invalid_credentials)?;

    issue_session(&state, PrincipalInfo::from(&user), StatusCode::OK).await
}

/// Handler for POST /api/auth/logout - Revoke the current session
pub async fn logout(State(state): State<AppState>, user: AuthUser) -> Result<Response> {
    state.sessions.revoke(&user.session_id).await?;
    tracing::info!(subject = %user.id, session_id = %user.session_id, "Session revoked");

    let cookie = session_cookie("", 0)?;
    Ok(([(header::SET_COOKIE, cookie)], Json(SuccessResponse::ok())).into_response())
}

/// Handler for GET /api/auth/me - Current principal
pub async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<PrincipalInfo>> {
    let principal = match user.kind {
        SubjectKind::User => state
            .user_repo
            .find_by_id(&user.id)
            .await?
            .map(|u| PrincipalInfo::from(&u)),
        SubjectKind::Reader => state
            .reader_repo
            .find_by_id(&user.id)
            .await?
            .map(|r| PrincipalInfo::from(&r)),
    };

    principal
        .map(Json)
        .ok_or_else(|| ApiError::AuthenticationError("Account no longer exists".to_string()))
}

/// Handler for POST /api/readers/register - Reader self-registration
pub async fn register_reader(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Response> {
    let email = req.email.trim().to_lowercase();
    let phone = crate::api::models::normalize_optional(req.phone);
    validate_registration(&email, &req.password, &req.full_name, phone.as_deref())?;

    tracing::info!(email = %email, "Reader registration attempt");

    let reader = Reader {
        id: Uuid::new_v4().to_string(),
        email,
        password_hash: hash_password_with_cost(&req.password, state.auth.bcrypt_cost)?,
        full_name: req.full_name.trim().to_string(),
        phone,
        created_at: now_timestamp(),
    };

    state.reader_repo.create(&reader).await.map_err(|e| match e {
        ApiError::Conflict(_) => ApiError::Conflict("Email is already registered".to_string()),
        other => other,
    })?;

    if let Err(e) = state
        .mailer
        .send(Email::welcome(&reader.email, &reader.full_name))
        .await
    {
        tracing::warn!(reader_id = %reader.id, "Failed to send welcome email: {}", e);
    }

    state
        .notifications
        .notify(
            notifications::READER_REGISTERED,
            &reader.id,
            json!({ "id": reader.id, "full_name": reader.full_name }),
        )
        .await;

    issue_session(&state, PrincipalInfo::from(&reader), StatusCode::CREATED).await
}

/// Handler for POST /api/readers/login - Reader login
pub async fn login_reader(
    State(state): State<AppState>,
    Json(req): Json<ReaderLoginRequest>,
) -> Result<Response> {
    let reader = state
        .reader_repo
        .find_by_email(&req.email)
        .await?
        .ok_or_else(invalid_credentials)?;

    if !verify_password(&req.password, &reader.password_hash)? {
        tracing::warn!(reader_id = %reader.id, "Invalid reader password");
        return Err(invalid_credentials());
    }

    issue_session(&state, PrincipalInfo::from(&reader), StatusCode::OK).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_format() {
        let cookie = session_cookie("abc.def.ghi", 900).unwrap();
        let value = cookie.to_str().unwrap();
        assert!(value.starts_with("session=abc.def.ghi;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.ends_with("Max-Age=900"));

        let cleared = session_cookie("", 0).unwrap();
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }
}
