use super::AppState;
use crate::api::models::{
    CreateUserRequest, ListQuery, SuccessResponse, UpdateUserRequest, UserResponse, Validate,
};
use crate::auth::middleware::AuthUser;
use crate::auth::models::SubjectKind;
use crate::auth::password::hash_password_with_cost;
use crate::core::error::{ApiError, Result};
use crate::core::pagination::Page;
use crate::core::utils::now_timestamp;
use crate::db::models::{User, ROLE_EDITOR};
use crate::db::repository::Repository;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

async fn find_user(state: &AppState, id: &str) -> Result<User> {
    state
        .user_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))
}

/// Handler for GET /api/users - Staff accounts (admin only)
pub async fn list_users(
    State(state): State<AppState>,
    admin: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<UserResponse>>> {
    admin.require_admin()?;

    let page = query.page();
    let (items, total) = state.user_repo.find_page(page).await?;
    Ok(Json(Page::new(items, total, page).map(UserResponse::from)))
}

/// Handler for GET /api/users/:id (admin only)
pub async fn get_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>> {
    admin.require_admin()?;
    Ok(Json(find_user(&state, &id).await?.into()))
}

/// Handler for POST /api/users - Create a staff account (admin only)
pub async fn create_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    admin.require_admin()?;
    req.validate()?;

    let new_user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username.trim().to_string(),
        email: req.email.trim().to_lowercase(),
        password_hash: hash_password_with_cost(&req.password, state.auth.bcrypt_cost)?,
        role: req.role.unwrap_or_else(|| ROLE_EDITOR.to_string()),
        mfa_enabled: i32::from(req.mfa_enabled),
        created_at: now_timestamp(),
    };

    state.user_repo.create(&new_user).await.map_err(|e| match e {
        ApiError::Conflict(_) => {
            ApiError::Conflict("Username or email is already in use".to_string())
        }
        other => other,
    })?;

    tracing::info!(
        admin_id = %admin.id,
        user_id = %new_user.id,
        role = %new_user.role,
        "Staff user created"
    );

    Ok((StatusCode::CREATED, Json(UserResponse::from(new_user))))
}

/// Handler for PATCH /api/users/:id (admin only)
///
/// A password change signs the user out everywhere.
pub async fn update_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>> {
    admin.require_admin()?;
    req.validate()?;

    let mut user = find_user(&state, &id).await?;

    if let Some(username) = req.username {
        user.username = username.trim().to_string();
    }
    if let Some(email) = req.email {
        user.email = email.trim().to_lowercase();
    }
    if let Some(role) = req.role {
        user.role = role;
    }
    if let Some(mfa_enabled) = req.mfa_enabled {
        user.mfa_enabled = i32::from(mfa_enabled);
    }
    let password_changed = match req.password {
        Some(password) => {
            user.password_hash = hash_password_with_cost(&password, state.auth.bcrypt_cost)?;
            true
        }
        None => false,
    };

    state.user_repo.update_retaining_admin(&user).await?;

    if password_changed {
        state
            .sessions
            .revoke_subject(SubjectKind::User, &user.id)
            .await?;
    }

    tracing::info!(admin_id = %admin.id, user_id = %user.id, "Staff user updated");
    Ok(Json(user.into()))
}

/// Handler for DELETE /api/users/:id (admin only, not self)
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    admin.require_admin()?;

    if admin.id == id {
        return Err(ApiError::InvalidRequest(
            "Administrators cannot delete their own account".to_string(),
        ));
    }

    state.user_repo.delete(&id).await?;
    state.sessions.revoke_subject(SubjectKind::User, &id).await?;

    tracing::info!(admin_id = %admin.id, user_id = %id, "Staff user deleted");
    Ok(Json(SuccessResponse::ok()))
}
