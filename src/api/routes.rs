//! API routes

use crate::api::handlers::{
    add_favorite, create_author, create_book, create_category, create_user, delete_author,
    delete_book, delete_book_image, delete_category, delete_reader, delete_user, get_author,
    get_book, get_category, get_reader, get_reader_me, get_user, health_check, list_author_books,
    list_authors, list_book_images, list_books, list_categories, list_category_books,
    list_favorites, list_notifications, list_readers, list_users, notifications_ws,
    remove_favorite, update_author, update_book, update_category, update_reader_me, update_user,
    upload_book_image, AppState, MULTIPART_OVERHEAD,
};
use crate::api::middleware::{rate_limit_middleware, RateLimiter};
use crate::auth::handlers::{login, login_reader, logout, me, register_reader, verify_mfa};
use crate::auth::middleware::authenticate;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};

/// Build the API routes
///
/// Catalog reads are public. Credential endpoints are rate limited per client.
/// Everything else requires a valid session.
pub fn build_api_routes(state: AppState, limiter: RateLimiter) -> Router {
    let max_upload = (state.uploads.max_size() + MULTIPART_OVERHEAD) as usize;

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/categories", get(list_categories))
        .route("/api/categories/:id", get(get_category))
        .route("/api/categories/:id/books", get(list_category_books))
        .route("/api/authors", get(list_authors))
        .route("/api/authors/:id", get(get_author))
        .route("/api/authors/:id/books", get(list_author_books))
        .route("/api/books", get(list_books))
        .route("/api/books/:id", get(get_book))
        .route("/api/books/:id/images", get(list_book_images));

    // Login and registration, limited per client address
    let credential_routes = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/mfa/verify", post(verify_mfa))
        .route("/api/readers/register", post(register_reader))
        .route("/api/readers/login", post(login_reader))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        // Session
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        // Catalog writes (staff)
        .route("/api/categories", post(create_category))
        .route(
            "/api/categories/:id",
            put(update_category).patch(update_category).delete(delete_category),
        )
        .route("/api/authors", post(create_author))
        .route(
            "/api/authors/:id",
            put(update_author).patch(update_author).delete(delete_author),
        )
        .route("/api/books", post(create_book))
        .route(
            "/api/books/:id",
            put(update_book).patch(update_book).delete(delete_book),
        )
        .route(
            "/api/books/:id/images",
            post(upload_book_image).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/api/images/:id", axum::routing::delete(delete_book_image))
        // Staff accounts (admin)
        .route("/api/users", get(list_users).post(create_user))
        .route(
            "/api/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        // Readers
        .route("/api/readers", get(list_readers))
        .route("/api/readers/me", get(get_reader_me).patch(update_reader_me))
        .route("/api/readers/me/favorites", get(list_favorites))
        .route(
            "/api/readers/me/favorites/:book_id",
            put(add_favorite).post(add_favorite).delete(remove_favorite),
        )
        .route("/api/readers/:id", get(get_reader).delete(delete_reader))
        // Notifications
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/ws", get(notifications_ws))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    // Combine public and protected routes
    public_routes
        .merge(credential_routes)
        .merge(protected_routes)
        .with_state(state)
}
