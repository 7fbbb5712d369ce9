use super::AppState;
use crate::api::models::{CreateCategoryRequest, ListQuery, SuccessResponse, UpdateCategoryRequest};
use crate::auth::middleware::AuthUser;
use crate::core::error::Result;
use crate::core::pagination::Page;
use crate::db::models::{Book, Category};
use crate::db::repository::BookFilter;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

/// Handler for GET /api/categories - Paginated categories ordered by name
pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Category>>> {
    let page = query.page();
    let (items, total) = state.category_repo.find_page(page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Handler for GET /api/categories/:id
pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Category>> {
    Ok(Json(state.catalog.get_category(&id).await?))
}

/// Handler for GET /api/categories/:id/books - Books of one category
pub async fn list_category_books(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Book>>> {
    state.catalog.get_category(&id).await?;

    let page = query.page();
    let filter = BookFilter {
        search: query.search,
        category_id: Some(id),
        ..Default::default()
    };
    let (items, total) = state.book_repo.find_page(filter, page).await?;
    Ok(Json(Page::new(items, total, page)))
}

/// Handler for POST /api/categories (staff)
pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse> {
    user.require_staff()?;
    let category = state.catalog.create_category(req).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// Handler for PATCH /api/categories/:id (staff)
pub async fn update_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<Category>> {
    user.require_staff()?;
    Ok(Json(state.catalog.update_category(&id, req).await?))
}

/// Handler for DELETE /api/categories/:id (staff)
pub async fn delete_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    user.require_staff()?;
    state.catalog.delete_category(&id).await?;
    Ok(Json(SuccessResponse::ok()))
}
