//! Business logic services
//!
//! `CatalogService` coordinates the catalog repositories, upload storage and
//! the notification hub. Handlers call it for every catalog write so that each
//! successful change is announced exactly once.

use crate::api::models::{
    BookDetail, CreateAuthorRequest, CreateBookRequest, CreateCategoryRequest, ImageResponse,
    UpdateAuthorRequest, UpdateBookRequest, UpdateCategoryRequest, Validate,
};
use crate::api::models::common::{normalize_isbn, normalize_optional};
use crate::core::error::{ApiError, Result};
use crate::core::notifications::{self, NotificationHub};
use crate::core::storage::UploadStore;
use crate::core::utils::now_timestamp;
use crate::db::models::{Author, Book, BookImage, Category};
use crate::db::repository::{
    AuthorRepository, BookImageRepository, BookRepository, CategoryRepository, Repository,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct CatalogService {
    categories: Arc<CategoryRepository>,
    authors: Arc<AuthorRepository>,
    books: Arc<BookRepository>,
    images: Arc<BookImageRepository>,
    uploads: Arc<UploadStore>,
    notifications: Arc<NotificationHub>,
}

fn not_found(what: &str, id: &str) -> ApiError {
    ApiError::NotFound(format!("{} {} not found", what, id))
}

/// Drop blanks and duplicates while keeping the caller's order
fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

impl CatalogService {
    pub fn new(
        categories: Arc<CategoryRepository>,
        authors: Arc<AuthorRepository>,
        books: Arc<BookRepository>,
        images: Arc<BookImageRepository>,
        uploads: Arc<UploadStore>,
        notifications: Arc<NotificationHub>,
    ) -> Self {
        Self {
            categories,
            authors,
            books,
            images,
            uploads,
            notifications,
        }
    }

    // ----- categories -----------------------------------------------------

    pub async fn get_category(&self, id: &str) -> Result<Category> {
        self.categories
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found("Category", id))
    }

    pub async fn create_category(&self, request: CreateCategoryRequest) -> Result<Category> {
        request.validate()?;

        let category = Category {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            description: normalize_optional(request.description),
            created_at: now_timestamp(),
        };
        self.categories.create(&category).await?;

        info!(category_id = %category.id, name = %category.name, "Category created");
        self.notifications
            .notify(notifications::CATEGORY_CREATED, &category.id, json!(category))
            .await;
        Ok(category)
    }

    pub async fn update_category(&self, id: &str, request: UpdateCategoryRequest) -> Result<Category> {
        request.validate()?;

        let mut category = self.get_category(id).await?;
        request.apply(&mut category);
        self.categories.update(&category).await?;

        self.notifications
            .notify(notifications::CATEGORY_UPDATED, &category.id, json!(category))
            .await;
        Ok(category)
    }

    /// Books of the category keep existing with no category
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        self.categories.delete(id).await?;

        info!(category_id = %id, "Category deleted");
        self.notifications
            .notify(notifications::CATEGORY_DELETED, id, json!({ "id": id }))
            .await;
        Ok(())
    }

    // ----- authors --------------------------------------------------------

    pub async fn get_author(&self, id: &str) -> Result<Author> {
        self.authors
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found("Author", id))
    }

    pub async fn create_author(&self, request: CreateAuthorRequest) -> Result<Author> {
        request.validate()?;

        let now = now_timestamp();
        let author = Author {
            id: Uuid::new_v4().to_string(),
            name: request.name.trim().to_string(),
            biography: normalize_optional(request.biography),
            birth_year: request.birth_year,
            created_at: now.clone(),
            updated_at: now,
        };
        self.authors.create(&author).await?;

        info!(author_id = %author.id, name = %author.name, "Author created");
        self.notifications
            .notify(notifications::AUTHOR_CREATED, &author.id, json!(author))
            .await;
        Ok(author)
    }

    pub async fn update_author(&self, id: &str, request: UpdateAuthorRequest) -> Result<Author> {
        request.validate()?;

        let mut author = self.get_author(id).await?;
        request.apply(&mut author);
        author.updated_at = now_timestamp();
        self.authors.update(&author).await?;

        self.notifications
            .notify(notifications::AUTHOR_UPDATED, &author.id, json!(author))
            .await;
        Ok(author)
    }

    pub async fn delete_author(&self, id: &str) -> Result<()> {
        self.authors.delete(id).await?;

        info!(author_id = %id, "Author deleted");
        self.notifications
            .notify(notifications::AUTHOR_DELETED, id, json!({ "id": id }))
            .await;
        Ok(())
    }

    // ----- books ----------------------------------------------------------

    pub async fn get_book(&self, id: &str) -> Result<Book> {
        self.books
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found("Book", id))
    }

    /// Book with authors, category and images
    pub async fn book_detail(&self, book: Book) -> Result<BookDetail> {
        let authors = self.authors.find_by_book(&book.id).await?;
        let category = match &book.category_id {
            Some(category_id) => self.categories.find_by_id(category_id).await?,
            None => None,
        };
        let images = self
            .images
            .find_by_book(&book.id)
            .await?
            .into_iter()
            .map(ImageResponse::from)
            .collect();

        Ok(BookDetail {
            book,
            authors,
            category,
            images,
        })
    }

    pub async fn create_book(&self, request: CreateBookRequest) -> Result<BookDetail> {
        request.validate()?;

        let now = now_timestamp();
        let book = Book {
            id: Uuid::new_v4().to_string(),
            title: request.title.trim().to_string(),
            isbn: normalize_isbn(request.isbn),
            description: normalize_optional(request.description),
            published_year: request.published_year,
            page_count: request.page_count,
            price: request.price,
            category_id: normalize_optional(request.category_id),
            created_at: now.clone(),
            updated_at: now,
        };

        self.books
            .create_with_authors(&book, dedup_ids(request.author_ids))
            .await?;

        info!(book_id = %book.id, title = %book.title, "Book created");
        let detail = self.book_detail(book).await?;
        self.notifications
            .notify(notifications::BOOK_CREATED, &detail.book.id, json!(detail))
            .await;
        Ok(detail)
    }

    pub async fn update_book(&self, id: &str, mut request: UpdateBookRequest) -> Result<BookDetail> {
        request.validate()?;

        let mut book = self.get_book(id).await?;
        request.apply(&mut book);
        book.updated_at = now_timestamp();

        let author_ids = request.author_ids.take().map(dedup_ids);
        self.books.update_with_authors(&book, author_ids).await?;

        let detail = self.book_detail(book).await?;
        self.notifications
            .notify(notifications::BOOK_UPDATED, &detail.book.id, json!(detail))
            .await;
        Ok(detail)
    }

    /// Delete a book; author links, image rows and favorites cascade, image
    /// files are removed afterwards
    pub async fn delete_book(&self, id: &str) -> Result<()> {
        let images = self.images.find_by_book(id).await?;
        self.books.delete(id).await?;

        for image in images {
            if let Err(e) = self.uploads.delete(&image.stored_path).await {
                warn!(image_id = %image.id, "Failed to remove image file: {}", e);
            }
        }

        info!(book_id = %id, "Book deleted");
        self.notifications
            .notify(notifications::BOOK_DELETED, id, json!({ "id": id }))
            .await;
        Ok(())
    }

    // ----- images ---------------------------------------------------------

    pub async fn add_image(
        &self,
        book_id: &str,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<ImageResponse> {
        self.get_book(book_id).await?;

        let stored = self
            .uploads
            .save(book_id, file_name, content_type, bytes)
            .await?;

        let image = BookImage {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            file_name: file_name.to_string(),
            content_type: stored.content_type,
            size: stored.size as i64,
            stored_path: stored.stored_path,
            created_at: now_timestamp(),
        };

        if let Err(e) = self.images.create(&image).await {
            // Row failed (book deleted meanwhile); do not leave the file behind
            let _ = self.uploads.delete(&image.stored_path).await;
            return Err(e);
        }

        info!(book_id = %book_id, image_id = %image.id, size = image.size, "Image uploaded");
        let response = ImageResponse::from(image);
        self.notifications
            .notify(notifications::IMAGE_UPLOADED, book_id, json!(response))
            .await;
        Ok(response)
    }

    pub async fn list_images(&self, book_id: &str) -> Result<Vec<ImageResponse>> {
        self.get_book(book_id).await?;
        Ok(self
            .images
            .find_by_book(book_id)
            .await?
            .into_iter()
            .map(ImageResponse::from)
            .collect())
    }

    pub async fn delete_image(&self, image_id: &str) -> Result<()> {
        let image = self
            .images
            .find_by_id(image_id)
            .await?
            .ok_or_else(|| not_found("Image", image_id))?;

        self.images.delete(&image.id).await?;
        self.uploads.delete(&image.stored_path).await?;

        self.notifications
            .notify(
                notifications::BOOK_UPDATED,
                &image.book_id,
                json!({ "id": image.book_id, "removed_image": image.id }),
            )
            .await;
        Ok(())
    }
}
