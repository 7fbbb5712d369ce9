use super::AppState;
use crate::api::models::{
    FavoriteResponse, ListQuery, ReaderResponse, SuccessResponse, UpdateReaderRequest, Validate,
};
use crate::auth::middleware::AuthUser;
use crate::auth::models::SubjectKind;
use crate::auth::password::{hash_password_with_cost, verify_password};
use crate::core::error::{ApiError, Result};
use crate::core::pagination::Page;
use crate::core::utils::now_timestamp;
use crate::db::models::{Book, Reader};
use crate::db::repository::{BookFilter, Repository};
use axum::{
    extract::{Path, Query, State},
    Json,
};

async fn find_reader(state: &AppState, id: &str) -> Result<Reader> {
    state
        .reader_repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Reader {} not found", id)))
}

/// Handler for GET /api/readers/me
pub async fn get_reader_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ReaderResponse>> {
    user.require_reader()?;
    Ok(Json(find_reader(&state, &user.id).await?.into()))
}

/// Handler for PATCH /api/readers/me
///
/// Changing the password requires the current one and ends every session of
/// the reader, including this one.
pub async fn update_reader_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(mut req): Json<UpdateReaderRequest>,
) -> Result<Json<ReaderResponse>> {
    user.require_reader()?;
    req.validate()?;

    let mut reader = find_reader(&state, &user.id).await?;
    req.apply_profile(&mut reader);

    let password_changed = match (req.password.take(), req.current_password.take()) {
        (Some(password), Some(current)) => {
            if !verify_password(&current, &reader.password_hash)? {
                return Err(ApiError::AuthenticationError(
                    "Current password is incorrect".to_string(),
                ));
            }
            reader.password_hash = hash_password_with_cost(&password, state.auth.bcrypt_cost)?;
            true
        }
        _ => false,
    };

    state.reader_repo.update(&reader).await?;

    if password_changed {
        state
            .sessions
            .revoke_subject(SubjectKind::Reader, &reader.id)
            .await?;
        tracing::info!(reader_id = %reader.id, "Reader password changed, sessions revoked");
    }

    Ok(Json(reader.into()))
}

/// Handler for GET /api/readers/me/favorites
pub async fn list_favorites(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Book>>> {
    user.require_reader()?;

    let page = query.page();
    let filter = BookFilter {
        search: query.search,
        favorite_of: Some(user.id),
        ..Default::default()
    };
    let (items, total) = state.book_repo.find_page(filter, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Handler for PUT /api/readers/me/favorites/:book_id - idempotent
pub async fn add_favorite(
    State(state): State<AppState>,
    user: AuthUser,
    Path(book_id): Path<String>,
) -> Result<Json<FavoriteResponse>> {
    user.require_reader()?;
    state.catalog.get_book(&book_id).await?;

    let added = state
        .reader_repo
        .add_favorite(&user.id, &book_id, &now_timestamp())
        .await?;
    if added {
        tracing::debug!(reader_id = %user.id, book_id = %book_id, "Favorite added");
    }

    Ok(Json(FavoriteResponse {
        book_id,
        favorite: true,
    }))
}

/// Handler for DELETE /api/readers/me/favorites/:book_id
pub async fn remove_favorite(
    State(state): State<AppState>,
    user: AuthUser,
    Path(book_id): Path<String>,
) -> Result<Json<FavoriteResponse>> {
    user.require_reader()?;

    if !state.reader_repo.remove_favorite(&user.id, &book_id).await? {
        return Err(ApiError::NotFound(format!(
            "Book {} is not in the favorites",
            book_id
        )));
    }

    Ok(Json(FavoriteResponse {
        book_id,
        favorite: false,
    }))
}

/// Handler for GET /api/readers (admin only)
pub async fn list_readers(
    State(state): State<AppState>,
    admin: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ReaderResponse>>> {
    admin.require_admin()?;

    let page = query.page();
    let (items, total) = state.reader_repo.find_page(page).await?;
    Ok(Json(Page::new(items, total, page).map(ReaderResponse::from)))
}

/// Handler for GET /api/readers/:id (admin only)
pub async fn get_reader(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ReaderResponse>> {
    admin.require_admin()?;
    Ok(Json(find_reader(&state, &id).await?.into()))
}

/// Handler for DELETE /api/readers/:id (admin only)
pub async fn delete_reader(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    admin.require_admin()?;

    state.reader_repo.delete(&id).await?;
    state
        .sessions
        .revoke_subject(SubjectKind::Reader, &id)
        .await?;

    tracing::info!(admin_id = %admin.id, reader_id = %id, "Reader deleted");
    Ok(Json(SuccessResponse::ok()))
}
