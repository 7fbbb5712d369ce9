use super::AppState;
use crate::api::models::{
    BookDetail, BookListQuery, CreateBookRequest, SuccessResponse, UpdateBookRequest,
};
use crate::auth::middleware::AuthUser;
use crate::core::error::Result;
use crate::core::pagination::Page;
use crate::db::models::Book;
use crate::db::repository::BookFilter;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// Handler for GET /api/books - Paginated books, newest first
pub async fn list_books(
    State(state): State<AppState>,
    Query(query): Query<BookListQuery>,
) -> Result<Json<Page<Book>>> {
    let page = query.page();
    let filter = BookFilter {
        search: query.search,
        category_id: query.category_id,
        author_id: query.author_id,
        favorite_of: None,
    };
    let (items, total) = state.book_repo.find_page(filter, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Handler for GET /api/books/:id - Book with authors, category and images
pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BookDetail>> {
    let book = state.catalog.get_book(&id).await?;
    Ok(Json(state.catalog.book_detail(book).await?))
}

/// Handler for POST /api/books (staff)
pub async fn create_book(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateBookRequest>,
) -> Result<impl IntoResponse> {
    user.require_staff()?;
    tracing::info!(user_id = %user.id, title = %req.title, "Creating book");

    let detail = state.catalog.create_book(req).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// Handler for PUT/PATCH /api/books/:id (staff)
pub async fn update_book(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateBookRequest>,
) -> Result<Json<BookDetail>> {
    user.require_staff()?;
    Ok(Json(state.catalog.update_book(&id, req).await?))
}

/// Handler for DELETE /api/books/:id (staff)
pub async fn delete_book(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    user.require_staff()?;
    tracing::info!(user_id = %user.id, book_id = %id, "Deleting book");

    state.catalog.delete_book(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}
