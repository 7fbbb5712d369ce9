//! Request/response bodies for categories, authors and books

use super::common::{
    double_option, normalize_isbn, normalize_optional, require_text, validate_isbn, ListQuery,
    Validate,
};
use crate::core::error::{ApiError, Result};
use crate::core::pagination::PageQuery;
use crate::db::models::{Author, Book, BookImage, Category};
use chrono::Datelike;
use serde::{Deserialize, Serialize};

const MAX_NAME_LEN: usize = 200;
const MAX_TITLE_LEN: usize = 300;
const MAX_TEXT_LEN: usize = 10_000;

fn check_optional_text(field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) if v.chars().count() > MAX_TEXT_LEN => Err(ApiError::ValidationError(format!(
            "{} must be at most {} characters",
            field, MAX_TEXT_LEN
        ))),
        _ => Ok(()),
    }
}

fn check_year(field: &str, year: Option<i32>) -> Result<()> {
    let latest = chrono::Utc::now().year() + 1;
    match year {
        Some(y) if !(0..=latest).contains(&y) => Err(ApiError::ValidationError(format!(
            "{} must be between 0 and {}",
            field, latest
        ))),
        _ => Ok(()),
    }
}

// ----- categories ---------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub description: Option<String>,
}

impl Validate for CreateCategoryRequest {
    fn validate(&self) -> Result<()> {
        require_text("name", &self.name, MAX_NAME_LEN)?;
        check_optional_text("description", self.description.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
}

impl Validate for UpdateCategoryRequest {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            require_text("name", name, MAX_NAME_LEN)?;
        }
        check_optional_text("description", self.description.as_ref().and_then(|d| d.as_deref()))
    }
}

impl UpdateCategoryRequest {
    pub fn apply(self, category: &mut Category) {
        if let Some(name) = self.name {
            category.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            category.description = normalize_optional(description);
        }
    }
}

// ----- authors ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateAuthorRequest {
    pub name: String,
    pub biography: Option<String>,
    pub birth_year: Option<i32>,
}

impl Validate for CreateAuthorRequest {
    fn validate(&self) -> Result<()> {
        require_text("name", &self.name, MAX_NAME_LEN)?;
        check_optional_text("biography", self.biography.as_deref())?;
        check_year("birth_year", self.birth_year)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAuthorRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub biography: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub birth_year: Option<Option<i32>>,
}

impl Validate for UpdateAuthorRequest {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            require_text("name", name, MAX_NAME_LEN)?;
        }
        check_optional_text("biography", self.biography.as_ref().and_then(|b| b.as_deref()))?;
        check_year("birth_year", self.birth_year.flatten())
    }
}

impl UpdateAuthorRequest {
    pub fn apply(self, author: &mut Author) {
        if let Some(name) = self.name {
            author.name = name.trim().to_string();
        }
        if let Some(biography) = self.biography {
            author.biography = normalize_optional(biography);
        }
        if let Some(birth_year) = self.birth_year {
            author.birth_year = birth_year;
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorDetail {
    #[serde(flatten)]
    pub author: Author,
    pub book_count: u64,
}

// ----- books --------------------------------------------------------------

/// `GET /api/books` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub search: Option<String>,
    pub category_id: Option<String>,
    pub author_id: Option<String>,
}

impl BookListQuery {
    pub fn page(&self) -> PageQuery {
        ListQuery {
            page: self.page,
            page_size: self.page_size,
            search: None,
        }
        .page()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<i32>,
    pub price: Option<f64>,
    pub category_id: Option<String>,
    #[serde(default)]
    pub author_ids: Vec<String>,
}

fn check_book_numbers(page_count: Option<i32>, price: Option<f64>) -> Result<()> {
    if matches!(page_count, Some(p) if p <= 0) {
        return Err(ApiError::ValidationError(
            "page_count must be greater than 0".to_string(),
        ));
    }
    if matches!(price, Some(p) if !p.is_finite() || p < 0.0) {
        return Err(ApiError::ValidationError(
            "price must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

impl Validate for CreateBookRequest {
    fn validate(&self) -> Result<()> {
        require_text("title", &self.title, MAX_TITLE_LEN)?;
        if let Some(isbn) = self.isbn.as_deref().filter(|i| !i.trim().is_empty()) {
            validate_isbn(isbn)?;
        }
        check_optional_text("description", self.description.as_deref())?;
        check_year("published_year", self.published_year)?;
        check_book_numbers(self.page_count, self.price)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBookRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub isbn: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub published_year: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub page_count: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub price: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub category_id: Option<Option<String>>,
    /// Replaces the whole author set when present
    pub author_ids: Option<Vec<String>>,
}

impl Validate for UpdateBookRequest {
    fn validate(&self) -> Result<()> {
        if let Some(title) = &self.title {
            require_text("title", title, MAX_TITLE_LEN)?;
        }
        if let Some(Some(isbn)) = &self.isbn {
            if !isbn.trim().is_empty() {
                validate_isbn(isbn)?;
            }
        }
        check_optional_text("description", self.description.as_ref().and_then(|d| d.as_deref()))?;
        check_year("published_year", self.published_year.flatten())?;
        check_book_numbers(self.page_count.flatten(), self.price.flatten())
    }
}

impl UpdateBookRequest {
    /// Copy scalar fields onto `book`; author links are handled separately
    pub fn apply(&mut self, book: &mut Book) {
        if let Some(title) = self.title.take() {
            book.title = title.trim().to_string();
        }
        if let Some(isbn) = self.isbn.take() {
            book.isbn = normalize_isbn(isbn);
        }
        if let Some(description) = self.description.take() {
            book.description = normalize_optional(description);
        }
        if let Some(year) = self.published_year.take() {
            book.published_year = year;
        }
        if let Some(page_count) = self.page_count.take() {
            book.page_count = page_count;
        }
        if let Some(price) = self.price.take() {
            book.price = price;
        }
        if let Some(category_id) = self.category_id.take() {
            book.category_id = normalize_optional(category_id);
        }
    }
}

/// Image metadata as exposed to clients; the storage path becomes a URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub id: String,
    pub book_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub url: String,
    pub created_at: String,
}

impl From<BookImage> for ImageResponse {
    fn from(image: BookImage) -> Self {
        Self {
            url: format!("/uploads/{}", image.stored_path),
            id: image.id,
            book_id: image.book_id,
            file_name: image.file_name,
            content_type: image.content_type,
            size: image.size,
            created_at: image.created_at,
        }
    }
}

/// Book with its related rows
#[derive(Debug, Serialize, Deserialize)]
pub struct BookDetail {
    #[serde(flatten)]
    pub book: Book,
    pub authors: Vec<Author>,
    pub category: Option<Category>,
    pub images: Vec<ImageResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Book {
        Book {
            id: "b1".into(),
            title: "Old".into(),
            isbn: Some("9780306406157".into()),
            description: Some("desc".into()),
            published_year: Some(2000),
            page_count: Some(100),
            price: Some(9.5),
            category_id: Some("c1".into()),
            created_at: "t".into(),
            updated_at: "t".into(),
        }
    }

    #[test]
    fn test_update_book_partial_and_clear() {
        let mut patch: UpdateBookRequest = serde_json::from_str(
            r#"{"title":" New ","category_id":null,"price":12.0}"#,
        )
        .unwrap();
        patch.validate().unwrap();

        let mut b = book();
        patch.apply(&mut b);
        assert_eq!(b.title, "New");
        assert_eq!(b.category_id, None);
        assert_eq!(b.price, Some(12.0));
        assert_eq!(b.isbn.as_deref(), Some("9780306406157"));
        assert!(patch.author_ids.is_none());
    }

    #[test]
    fn test_create_book_validation() {
        let bad: CreateBookRequest =
            serde_json::from_str(r#"{"title":"","author_ids":[]}"#).unwrap();
        assert!(bad.validate().is_err());

        let bad_price: CreateBookRequest =
            serde_json::from_str(r#"{"title":"T","price":-1}"#).unwrap();
        assert!(bad_price.validate().is_err());

        let bad_isbn: CreateBookRequest =
            serde_json::from_str(r#"{"title":"T","isbn":"123"}"#).unwrap();
        assert!(bad_isbn.validate().is_err());

        let ok: CreateBookRequest =
            serde_json::from_str(r#"{"title":"T","published_year":1965,"page_count":412}"#).unwrap();
        assert!(ok.validate().is_ok());
        assert!(ok.author_ids.is_empty());
    }

    #[test]
    fn test_image_response_hides_storage_path() {
        let image = BookImage {
            id: "i1".into(),
            book_id: "b1".into(),
            file_name: "cover.png".into(),
            content_type: "image/png".into(),
            size: 10,
            stored_path: "books/b1/x.png".into(),
            created_at: "t".into(),
        };
        let json = serde_json::to_value(ImageResponse::from(image)).unwrap();
        assert_eq!(json["url"], "/uploads/books/b1/x.png");
        assert!(json.get("stored_path").is_none());
    }

    #[test]
    fn test_author_year_bounds() {
        let req = CreateAuthorRequest {
            name: "A".into(),
            biography: None,
            birth_year: Some(99_999),
        };
        assert!(req.validate().is_err());
    }
}
