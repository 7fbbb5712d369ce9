use super::AppState;
use crate::api::models::{ImageResponse, SuccessResponse};
use crate::auth::middleware::AuthUser;
use crate::core::error::{ApiError, Result};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "file";

/// Multipart framing allowance on top of the file size limit
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Body-limit failures surface as 413, anything else as a malformed request
fn multipart_error(err: MultipartError, max_size: u64, context: &str) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(format!("File exceeds the {} byte limit", max_size))
    } else {
        ApiError::InvalidRequest(format!("{}: {}", context, err))
    }
}

/// Handler for POST /api/books/:id/images (staff) - multipart upload
pub async fn upload_book_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path(book_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    user.require_staff()?;

    let max_size = state.uploads.max_size();
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_length.is_some_and(|len| len > max_size + MULTIPART_OVERHEAD) {
        return Err(ApiError::PayloadTooLarge(format!(
            "File exceeds the {} byte limit",
            max_size
        )));
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_size, "Malformed multipart body"))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_size, "Failed to read upload"))?;

        let image = state
            .catalog
            .add_image(&book_id, &file_name, content_type.as_deref(), &bytes)
            .await?;
        return Ok((StatusCode::CREATED, Json(image)));
    }

    Err(ApiError::ValidationError(format!(
        "Multipart field '{}' is required",
        UPLOAD_FIELD
    )))
}

/// Handler for GET /api/books/:id/images
pub async fn list_book_images(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<Vec<ImageResponse>>> {
    Ok(Json(state.catalog.list_images(&book_id).await?))
}

/// Handler for DELETE /api/images/:id (staff)
pub async fn delete_book_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path(image_id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    user.require_staff()?;
    state.catalog.delete_image(&image_id).await?;
    Ok(Json(SuccessResponse::ok()))
}
