use super::AppState;
use crate::api::models::{
    AuthorDetail, CreateAuthorRequest, ListQuery, SuccessResponse, UpdateAuthorRequest,
};
use crate::auth::middleware::AuthUser;
use crate::core::error::Result;
use crate::core::pagination::Page;
use crate::db::models::{Author, Book};
use crate::db::repository::BookFilter;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// Handler for GET /api/authors - Paginated authors, `?search=` filters by name
pub async fn list_authors(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Author>>> {
    let page = query.page();
    let (items, total) = state.author_repo.find_page(query.search, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Handler for GET /api/authors/:id - Author with book count
pub async fn get_author(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuthorDetail>> {
    let author = state.catalog.get_author(&id).await?;
    let book_count = state.author_repo.count_books(&author.id).await?;
    Ok(Json(AuthorDetail { author, book_count }))
}

/// Handler for GET /api/authors/:id/books
pub async fn list_author_books(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Book>>> {
    state.catalog.get_author(&id).await?;

    let page = query.page();
    let filter = BookFilter {
        search: query.search,
        author_id: Some(id),
        ..Default::default()
    };
    let (items, total) = state.book_repo.find_page(filter, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Handler for POST /api/authors (staff)
pub async fn create_author(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateAuthorRequest>,
) -> Result<impl IntoResponse> {
    user.require_staff()?;
    let author = state.catalog.create_author(req).await?;
    Ok((StatusCode::CREATED, Json(author)))
}

/// Handler for PATCH /api/authors/:id (staff)
pub async fn update_author(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateAuthorRequest>,
) -> Result<Json<Author>> {
    user.require_staff()?;
    Ok(Json(state.catalog.update_author(&id, req).await?))
}

/// Handler for DELETE /api/authors/:id (staff)
pub async fn delete_author(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    user.require_staff()?;
    state.catalog.delete_author(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}
