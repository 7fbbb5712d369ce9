//! Repository pattern implementation for data access layer
//!
//! Every repository wraps the shared `DatabaseManager` and runs its SQL on the
//! blocking pool. Constraint failures surface as `ApiError::Conflict` /
//! `ApiError::InvalidReference` through `ApiError::from_db`.

use crate::core::error::{ApiError, Result};
use crate::core::pagination::PageQuery;
use crate::db::manager::DatabaseManager;
use crate::db::models::{
    Author, Book, BookImage, Category, MfaChallenge, Reader, SessionRecord, User, ROLE_ADMIN,
};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<()>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<()>;

    /// Delete an entity by its ID; `NotFound` when no row matched
    async fn delete(&self, id: &str) -> Result<()>;
}

fn ensure_affected(affected: usize, what: &str, id: &str) -> Result<()> {
    if affected == 0 {
        Err(ApiError::NotFound(format!("{} {} not found", what, id)))
    } else {
        Ok(())
    }
}

/// Substring pattern for `LIKE ? ESCAPE '\'`; wildcards in the input match literally
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

const CATEGORY_COLUMNS: &str = "id, name, description, created_at";

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn update_user_row(conn: &rusqlite::Connection, user: &User) -> Result<()> {
    let affected = conn.execute(
        "UPDATE users SET username = ?, email = ?, password_hash = ?, role = ?, mfa_enabled = ? \
         WHERE id = ?",
        params![
            &user.username,
            &user.email,
            &user.password_hash,
            &user.role,
            user.mfa_enabled,
            &user.id
        ],
    )?;
    ensure_affected(affected, "User", &user.id)
}

/// Repository for Category entities
pub struct CategoryRepository {
    db: Arc<DatabaseManager>,
}

impl CategoryRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Categories ordered by name, one page at a time
    pub async fn find_page(&self, page: PageQuery) -> Result<(Vec<Category>, u64)> {
        self.db
            .execute(move |conn| {
                let total: i64 =
                    conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM categories ORDER BY name COLLATE NOCASE LIMIT ? OFFSET ?",
                    CATEGORY_COLUMNS
                ))?;
                let categories = stmt
                    .query_map(params![page.limit(), page.offset()], category_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok((categories, total as u64))
            })
            .await
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Category>> {
        let name = name.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM categories WHERE name = ?", CATEGORY_COLUMNS),
                        [&name],
                        category_from_row,
                    )
                    .optional()?)
            })
            .await
    }
}

#[async_trait]
impl Repository<Category> for CategoryRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Category>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS),
                        [&id],
                        category_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn create(&self, category: &Category) -> Result<()> {
        let category = category.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO categories (id, name, description, created_at) VALUES (?, ?, ?, ?)",
                    params![
                        &category.id,
                        &category.name,
                        &category.description,
                        &category.created_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update(&self, category: &Category) -> Result<()> {
        let category = category.clone();
        self.db
            .execute(move |conn| {
                let affected = conn.execute(
                    "UPDATE categories SET name = ?, description = ? WHERE id = ?",
                    params![&category.name, &category.description, &category.id],
                )?;
                ensure_affected(affected, "Category", &category.id)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let affected = conn.execute("DELETE FROM categories WHERE id = ?", [&id])?;
                ensure_affected(affected, "Category", &id)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Authors
// ---------------------------------------------------------------------------

const AUTHOR_COLUMNS: &str = "a.id, a.name, a.biography, a.birth_year, a.created_at, a.updated_at";

fn author_from_row(row: &Row) -> rusqlite::Result<Author> {
    Ok(Author {
        id: row.get(0)?,
        name: row.get(1)?,
        biography: row.get(2)?,
        birth_year: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Repository for Author entities
pub struct AuthorRepository {
    db: Arc<DatabaseManager>,
}

impl AuthorRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Authors ordered by name, optionally filtered by a name fragment
    pub async fn find_page(
        &self,
        search: Option<String>,
        page: PageQuery,
    ) -> Result<(Vec<Author>, u64)> {
        self.db
            .execute(move |conn| {
                let (condition, args): (&str, Vec<String>) = match search {
                    Some(s) if !s.trim().is_empty() => ("WHERE a.name LIKE ? ESCAPE '\\'", vec![like_pattern(&s)]),
                    _ => ("", Vec::new()),
                };

                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM authors a {}", condition),
                    rusqlite::params_from_iter(args.iter()),
                    |row| row.get(0),
                )?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM authors a {} ORDER BY a.name COLLATE NOCASE LIMIT {} OFFSET {}",
                    AUTHOR_COLUMNS,
                    condition,
                    page.limit(),
                    page.offset()
                ))?;
                let authors = stmt
                    .query_map(rusqlite::params_from_iter(args.iter()), author_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok((authors, total as u64))
            })
            .await
    }

    /// Authors linked to a book
    pub async fn find_by_book(&self, book_id: &str) -> Result<Vec<Author>> {
        let book_id = book_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM authors a \
                     JOIN book_authors ba ON ba.author_id = a.id \
                     WHERE ba.book_id = ? ORDER BY a.name COLLATE NOCASE",
                    AUTHOR_COLUMNS
                ))?;
                let authors = stmt
                    .query_map([&book_id], author_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(authors)
            })
            .await
    }

    pub async fn count_books(&self, author_id: &str) -> Result<u64> {
        let author_id = author_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM book_authors WHERE author_id = ?",
                    [&author_id],
                    |row| row.get(0),
                )?;
                Ok(count as u64)
            })
            .await
    }
}

#[async_trait]
impl Repository<Author> for AuthorRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Author>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM authors a WHERE a.id = ?", AUTHOR_COLUMNS),
                        [&id],
                        author_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn create(&self, author: &Author) -> Result<()> {
        let author = author.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO authors (id, name, biography, birth_year, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        &author.id,
                        &author.name,
                        &author.biography,
                        author.birth_year,
                        &author.created_at,
                        &author.updated_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update(&self, author: &Author) -> Result<()> {
        let author = author.clone();
        self.db
            .execute(move |conn| {
                let affected = conn.execute(
                    "UPDATE authors SET name = ?, biography = ?, birth_year = ?, updated_at = ? \
                     WHERE id = ?",
                    params![
                        &author.name,
                        &author.biography,
                        author.birth_year,
                        &author.updated_at,
                        &author.id
                    ],
                )?;
                ensure_affected(affected, "Author", &author.id)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let affected = conn.execute("DELETE FROM authors WHERE id = ?", [&id])?;
                ensure_affected(affected, "Author", &id)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Books
// ---------------------------------------------------------------------------

const BOOK_COLUMNS: &str = "b.id, b.title, b.isbn, b.description, b.published_year, b.page_count, \
                            b.price, b.category_id, b.created_at, b.updated_at";

fn book_from_row(row: &Row) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        isbn: row.get(2)?,
        description: row.get(3)?,
        published_year: row.get(4)?,
        page_count: row.get(5)?,
        price: row.get(6)?,
        category_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Filters accepted by the book listing
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub search: Option<String>,
    pub category_id: Option<String>,
    pub author_id: Option<String>,
    pub favorite_of: Option<String>,
}

impl BookFilter {
    fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            conditions.push("(b.title LIKE ? ESCAPE '\\' OR b.isbn LIKE ? ESCAPE '\\' \
             OR b.description LIKE ? ESCAPE '\\')");
            let pattern = like_pattern(search);
            args.extend([pattern.clone(), pattern.clone(), pattern]);
        }

        if let Some(category_id) = &self.category_id {
            conditions.push("b.category_id = ?");
            args.push(category_id.clone());
        }

        if let Some(author_id) = &self.author_id {
            conditions.push("b.id IN (SELECT book_id FROM book_authors WHERE author_id = ?)");
            args.push(author_id.clone());
        }

        if let Some(reader_id) = &self.favorite_of {
            conditions.push("b.id IN (SELECT book_id FROM favorite_books WHERE reader_id = ?)");
            args.push(reader_id.clone());
        }

        if conditions.is_empty() {
            (String::new(), args)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), args)
        }
    }
}

fn replace_book_authors(
    tx: &rusqlite::Transaction,
    book_id: &str,
    author_ids: &[String],
) -> Result<()> {
    tx.execute("DELETE FROM book_authors WHERE book_id = ?", [book_id])?;
    let mut stmt = tx.prepare("INSERT OR IGNORE INTO book_authors (book_id, author_id) VALUES (?, ?)")?;
    for author_id in author_ids {
        stmt.execute(params![book_id, author_id])?;
    }
    Ok(())
}

/// Repository for Book entities
pub struct BookRepository {
    db: Arc<DatabaseManager>,
}

impl BookRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Books matching `filter`, newest first
    pub async fn find_page(&self, filter: BookFilter, page: PageQuery) -> Result<(Vec<Book>, u64)> {
        self.db
            .execute(move |conn| {
                let (where_clause, args) = filter.to_sql();

                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM books b {}", where_clause),
                    rusqlite::params_from_iter(args.iter()),
                    |row| row.get(0),
                )?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM books b {} ORDER BY b.created_at DESC, b.rowid DESC \
                     LIMIT {} OFFSET {}",
                    BOOK_COLUMNS,
                    where_clause,
                    page.limit(),
                    page.offset()
                ))?;
                let books = stmt
                    .query_map(rusqlite::params_from_iter(args.iter()), book_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                Ok((books, total as u64))
            })
            .await
    }

    /// Insert a book and its author links atomically
    pub async fn create_with_authors(&self, book: &Book, author_ids: Vec<String>) -> Result<()> {
        let book = book.clone();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "INSERT INTO books (id, title, isbn, description, published_year, page_count, \
                     price, category_id, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        &book.id,
                        &book.title,
                        &book.isbn,
                        &book.description,
                        book.published_year,
                        book.page_count,
                        book.price,
                        &book.category_id,
                        &book.created_at,
                        &book.updated_at,
                    ],
                )?;
                replace_book_authors(tx, &book.id, &author_ids)
            })
            .await
    }

    /// Update a book; `author_ids = Some(..)` replaces its author set
    pub async fn update_with_authors(
        &self,
        book: &Book,
        author_ids: Option<Vec<String>>,
    ) -> Result<()> {
        let book = book.clone();
        self.db
            .transaction(move |tx| {
                let affected = tx.execute(
                    "UPDATE books SET title = ?, isbn = ?, description = ?, published_year = ?, \
                     page_count = ?, price = ?, category_id = ?, updated_at = ? WHERE id = ?",
                    params![
                        &book.title,
                        &book.isbn,
                        &book.description,
                        book.published_year,
                        book.page_count,
                        book.price,
                        &book.category_id,
                        &book.updated_at,
                        &book.id,
                    ],
                )?;
                ensure_affected(affected, "Book", &book.id)?;

                if let Some(author_ids) = author_ids {
                    replace_book_authors(tx, &book.id, &author_ids)?;
                }
                Ok(())
            })
            .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.db
            .execute(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
    }
}

#[async_trait]
impl Repository<Book> for BookRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Book>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM books b WHERE b.id = ?", BOOK_COLUMNS),
                        [&id],
                        book_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn create(&self, book: &Book) -> Result<()> {
        self.create_with_authors(book, Vec::new()).await
    }

    async fn update(&self, book: &Book) -> Result<()> {
        self.update_with_authors(book, None).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let affected = conn.execute("DELETE FROM books WHERE id = ?", [&id])?;
                ensure_affected(affected, "Book", &id)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Book images
// ---------------------------------------------------------------------------

const IMAGE_COLUMNS: &str = "id, book_id, file_name, content_type, size, stored_path, created_at";

fn image_from_row(row: &Row) -> rusqlite::Result<BookImage> {
    Ok(BookImage {
        id: row.get(0)?,
        book_id: row.get(1)?,
        file_name: row.get(2)?,
        content_type: row.get(3)?,
        size: row.get(4)?,
        stored_path: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Repository for uploaded book images
pub struct BookImageRepository {
    db: Arc<DatabaseManager>,
}

impl BookImageRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_book(&self, book_id: &str) -> Result<Vec<BookImage>> {
        let book_id = book_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM book_images WHERE book_id = ? ORDER BY created_at, rowid",
                    IMAGE_COLUMNS
                ))?;
                let images = stmt
                    .query_map([&book_id], image_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(images)
            })
            .await
    }
}

#[async_trait]
impl Repository<BookImage> for BookImageRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<BookImage>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM book_images WHERE id = ?", IMAGE_COLUMNS),
                        [&id],
                        image_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn create(&self, image: &BookImage) -> Result<()> {
        let image = image.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO book_images (id, book_id, file_name, content_type, size, stored_path, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        &image.id,
                        &image.book_id,
                        &image.file_name,
                        &image.content_type,
                        image.size,
                        &image.stored_path,
                        &image.created_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update(&self, image: &BookImage) -> Result<()> {
        let image = image.clone();
        self.db
            .execute(move |conn| {
                let affected = conn.execute(
                    "UPDATE book_images SET file_name = ?, content_type = ? WHERE id = ?",
                    params![&image.file_name, &image.content_type, &image.id],
                )?;
                ensure_affected(affected, "Image", &image.id)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let affected = conn.execute("DELETE FROM book_images WHERE id = ?", [&id])?;
                ensure_affected(affected, "Image", &id)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Staff users
// ---------------------------------------------------------------------------

const USER_COLUMNS: &str = "id, username, email, password_hash, role, mfa_enabled, created_at";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        mfa_enabled: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Repository for staff users
pub struct UserRepository {
    db: Arc<DatabaseManager>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS),
                        [&username],
                        user_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn count(&self) -> Result<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
            .await
    }

    /// Update a user, refusing any change that leaves no administrator
    pub async fn update_retaining_admin(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.db
            .transaction(move |tx| {
                update_user_row(tx, &user)?;
                let admins: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM users WHERE role = ?",
                    [ROLE_ADMIN],
                    |row| row.get(0),
                )?;
                if admins == 0 {
                    return Err(ApiError::InvalidRequest(
                        "At least one administrator account must remain".to_string(),
                    ));
                }
                Ok(())
            })
            .await
    }

    pub async fn find_page(&self, page: PageQuery) -> Result<(Vec<User>, u64)> {
        self.db
            .execute(move |conn| {
                let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM users ORDER BY username LIMIT ? OFFSET ?",
                    USER_COLUMNS
                ))?;
                let users = stmt
                    .query_map(params![page.limit(), page.offset()], user_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((users, total as u64))
            })
            .await
    }
}

#[async_trait]
impl Repository<User> for UserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                        [&id],
                        user_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn create(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, username, email, password_hash, role, mfa_enabled, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        &user.id,
                        &user.username,
                        &user.email,
                        &user.password_hash,
                        &user.role,
                        user.mfa_enabled,
                        &user.created_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.db
            .execute(move |conn| update_user_row(conn, &user))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let affected = conn.execute("DELETE FROM users WHERE id = ?", [&id])?;
                ensure_affected(affected, "User", &id)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Readers and favorites
// ---------------------------------------------------------------------------

const READER_COLUMNS: &str = "id, email, password_hash, full_name, phone, created_at";

fn reader_from_row(row: &Row) -> rusqlite::Result<Reader> {
    Ok(Reader {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        full_name: row.get(3)?,
        phone: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Repository for readers (clients)
pub struct ReaderRepository {
    db: Arc<DatabaseManager>,
}

impl ReaderRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Reader>> {
        let email = email.to_lowercase();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM readers WHERE email = ?", READER_COLUMNS),
                        [&email],
                        reader_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn find_page(&self, page: PageQuery) -> Result<(Vec<Reader>, u64)> {
        self.db
            .execute(move |conn| {
                let total: i64 = conn.query_row("SELECT COUNT(*) FROM readers", [], |row| row.get(0))?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM readers ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
                    READER_COLUMNS
                ))?;
                let readers = stmt
                    .query_map(params![page.limit(), page.offset()], reader_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((readers, total as u64))
            })
            .await
    }

    /// Mark a book as favorite; returns false when it already was
    pub async fn add_favorite(&self, reader_id: &str, book_id: &str, created_at: &str) -> Result<bool> {
        let (reader_id, book_id, created_at) =
            (reader_id.to_string(), book_id.to_string(), created_at.to_string());
        self.db
            .execute(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO favorite_books (reader_id, book_id, created_at) VALUES (?, ?, ?)",
                    params![&reader_id, &book_id, &created_at],
                )?;
                Ok(inserted > 0)
            })
            .await
    }

    /// Returns false when the book was not a favorite
    pub async fn remove_favorite(&self, reader_id: &str, book_id: &str) -> Result<bool> {
        let (reader_id, book_id) = (reader_id.to_string(), book_id.to_string());
        self.db
            .execute(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM favorite_books WHERE reader_id = ? AND book_id = ?",
                    params![&reader_id, &book_id],
                )?;
                Ok(removed > 0)
            })
            .await
    }

    pub async fn is_favorite(&self, reader_id: &str, book_id: &str) -> Result<bool> {
        let (reader_id, book_id) = (reader_id.to_string(), book_id.to_string());
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM favorite_books WHERE reader_id = ? AND book_id = ?",
                    params![&reader_id, &book_id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }
}

#[async_trait]
impl Repository<Reader> for ReaderRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Reader>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM readers WHERE id = ?", READER_COLUMNS),
                        [&id],
                        reader_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn create(&self, reader: &Reader) -> Result<()> {
        let reader = reader.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO readers (id, email, password_hash, full_name, phone, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        &reader.id,
                        &reader.email.to_lowercase(),
                        &reader.password_hash,
                        &reader.full_name,
                        &reader.phone,
                        &reader.created_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update(&self, reader: &Reader) -> Result<()> {
        let reader = reader.clone();
        self.db
            .execute(move |conn| {
                let affected = conn.execute(
                    "UPDATE readers SET email = ?, password_hash = ?, full_name = ?, phone = ? WHERE id = ?",
                    params![
                        &reader.email.to_lowercase(),
                        &reader.password_hash,
                        &reader.full_name,
                        &reader.phone,
                        &reader.id
                    ],
                )?;
                ensure_affected(affected, "Reader", &reader.id)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let affected = conn.execute("DELETE FROM readers WHERE id = ?", [&id])?;
                ensure_affected(affected, "Reader", &id)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

fn session_from_row(row: &Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        subject_kind: row.get(2)?,
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        revoked: row.get(5)?,
    })
}

/// Repository backing the SQLite session store
pub struct SessionRepository {
    db: Arc<DatabaseManager>,
}

impl SessionRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, session: &SessionRecord) -> Result<()> {
        let session = session.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, subject_id, subject_kind, created_at, expires_at, revoked) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        &session.id,
                        &session.subject_id,
                        &session.subject_kind,
                        &session.created_at,
                        &session.expires_at,
                        session.revoked
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Session that is neither revoked nor expired at `now`
    pub async fn find_active(&self, id: &str, now: &str) -> Result<Option<SessionRecord>> {
        let (id, now) = (id.to_string(), now.to_string());
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, subject_id, subject_kind, created_at, expires_at, revoked \
                         FROM sessions WHERE id = ? AND revoked = 0 AND expires_at > ?",
                        params![&id, &now],
                        session_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn revoke(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("UPDATE sessions SET revoked = 1 WHERE id = ?", [&id])?;
                Ok(())
            })
            .await
    }

    pub async fn revoke_subject(&self, subject_kind: &str, subject_id: &str) -> Result<()> {
        let (subject_kind, subject_id) = (subject_kind.to_string(), subject_id.to_string());
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE sessions SET revoked = 1 WHERE subject_kind = ? AND subject_id = ?",
                    params![&subject_kind, &subject_id],
                )?;
                Ok(())
            })
            .await
    }

    /// Drop expired or revoked sessions; returns how many were removed
    pub async fn purge(&self, now: &str) -> Result<usize> {
        let now = now.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM sessions WHERE revoked = 1 OR expires_at <= ?",
                    [&now],
                )?)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// MFA challenges
// ---------------------------------------------------------------------------

/// Repository for pending MFA challenges
/// Result of one code guess
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MfaAttempt {
    /// Code matched; the challenge is consumed
    Accepted { user_id: String },
    /// Code did not match; the challenge is deleted once `remaining` hits 0
    Rejected { user_id: String, remaining: u32 },
    /// Unknown, expired or already exhausted challenge
    Unavailable,
}

pub struct MfaChallengeRepository {
    db: Arc<DatabaseManager>,
}

impl MfaChallengeRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Store a challenge, replacing any earlier one for the same user
    pub async fn replace_for_user(&self, challenge: &MfaChallenge) -> Result<()> {
        let challenge = challenge.clone();
        self.db
            .transaction(move |tx| {
                tx.execute(
                    "DELETE FROM mfa_challenges WHERE user_id = ?",
                    [&challenge.user_id],
                )?;
                tx.execute(
                    "INSERT INTO mfa_challenges (id, user_id, code_hash, attempts, expires_at, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        &challenge.id,
                        &challenge.user_id,
                        &challenge.code_hash,
                        challenge.attempts,
                        &challenge.expires_at,
                        &challenge.created_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<MfaChallenge>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, user_id, code_hash, attempts, expires_at, created_at \
                         FROM mfa_challenges WHERE id = ?",
                        [&id],
                        |row| {
                            Ok(MfaChallenge {
                                id: row.get(0)?,
                                user_id: row.get(1)?,
                                code_hash: row.get(2)?,
                                attempts: row.get(3)?,
                                expires_at: row.get(4)?,
                                created_at: row.get(5)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await
    }

    /// Count one guess against a challenge and compare it in the same transaction
    ///
    /// The attempt is claimed before the comparison, so concurrent guesses can
    /// never exceed `max_attempts` comparisons in total.
    pub async fn attempt(
        &self,
        id: &str,
        code_hash: &str,
        max_attempts: u32,
        now: &str,
    ) -> Result<MfaAttempt> {
        let id = id.to_string();
        let code_hash = code_hash.to_string();
        let now = now.to_string();
        self.db
            .transaction(move |tx| {
                let claimed = tx.execute(
                    "UPDATE mfa_challenges SET attempts = attempts + 1 \
                     WHERE id = ? AND attempts < ? AND expires_at > ?",
                    params![&id, max_attempts, &now],
                )?;
                if claimed == 0 {
                    tx.execute("DELETE FROM mfa_challenges WHERE id = ?", [&id])?;
                    return Ok(MfaAttempt::Unavailable);
                }

                let (user_id, stored_hash, attempts): (String, String, u32) = tx.query_row(
                    "SELECT user_id, code_hash, attempts FROM mfa_challenges WHERE id = ?",
                    [&id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

                if stored_hash == code_hash {
                    tx.execute("DELETE FROM mfa_challenges WHERE id = ?", [&id])?;
                    return Ok(MfaAttempt::Accepted { user_id });
                }

                if attempts >= max_attempts {
                    tx.execute("DELETE FROM mfa_challenges WHERE id = ?", [&id])?;
                }
                Ok(MfaAttempt::Rejected {
                    user_id,
                    remaining: max_attempts.saturating_sub(attempts),
                })
            })
            .await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM mfa_challenges WHERE id = ?", [&id])?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::now_timestamp;

    fn setup() -> Arc<DatabaseManager> {
        Arc::new(DatabaseManager::new_in_memory().unwrap())
    }

    fn book(id: &str, title: &str) -> Book {
        let now = now_timestamp();
        Book {
            id: id.to_string(),
            title: title.to_string(),
            isbn: None,
            description: None,
            published_year: Some(1999),
            page_count: None,
            price: None,
            category_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn author(id: &str, name: &str) -> Author {
        let now = now_timestamp();
        Author {
            id: id.to_string(),
            name: name.to_string(),
            biography: None,
            birth_year: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_category_unique_name() {
        let repo = CategoryRepository::new(setup());
        let category = Category {
            id: "c1".into(),
            name: "Fiction".into(),
            description: None,
            created_at: now_timestamp(),
        };
        repo.create(&category).await.unwrap();

        let duplicate = Category {
            id: "c2".into(),
            ..category
        };
        let err = repo.create(&duplicate).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_book_with_authors_and_filters() {
        let db = setup();
        let books = BookRepository::new(db.clone());
        let authors = AuthorRepository::new(db.clone());

        authors.create(&author("a1", "Ursula K. Le Guin")).await.unwrap();
        authors.create(&author("a2", "Italo Calvino")).await.unwrap();

        books
            .create_with_authors(&book("b1", "The Dispossessed"), vec!["a1".into()])
            .await
            .unwrap();
        books
            .create_with_authors(&book("b2", "Invisible Cities"), vec!["a2".into()])
            .await
            .unwrap();

        let (page, total) = books
            .find_page(
                BookFilter {
                    author_id: Some("a1".into()),
                    ..Default::default()
                },
                PageQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].title, "The Dispossessed");

        let (page, _) = books
            .find_page(
                BookFilter {
                    search: Some("cities".into()),
                    ..Default::default()
                },
                PageQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "b2");

        assert_eq!(authors.count_books("a1").await.unwrap(), 1);
        assert_eq!(authors.find_by_book("b2").await.unwrap()[0].name, "Italo Calvino");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" dune "), "%dune%");
        assert_eq!(like_pattern("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let db = setup();
        let books = BookRepository::new(db.clone());
        let authors = AuthorRepository::new(db);

        books.create_with_authors(&book("b1", "100% Wolf"), vec![]).await.unwrap();
        books.create_with_authors(&book("b2", "Persuasion"), vec![]).await.unwrap();
        authors.create(&author("a1", "Jane Austen")).await.unwrap();

        let search = |term: &str| BookFilter {
            search: Some(term.to_string()),
            ..Default::default()
        };
        let (_, total) = books.find_page(search("_"), PageQuery::default()).await.unwrap();
        assert_eq!(total, 0);
        let (page, total) = books.find_page(search("%"), PageQuery::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].id, "b1");

        let (_, total) = authors
            .find_page(Some("_".into()), PageQuery::default())
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_unknown_author_rolls_back_book() {
        let db = setup();
        let books = BookRepository::new(db);

        let err = books
            .create_with_authors(&book("b1", "Orphan"), vec!["missing".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidReference(_)));
        assert!(books.find_by_id("b1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_category_delete_keeps_books() {
        let db = setup();
        let categories = CategoryRepository::new(db.clone());
        let books = BookRepository::new(db);

        categories
            .create(&Category {
                id: "c1".into(),
                name: "Science".into(),
                description: None,
                created_at: now_timestamp(),
            })
            .await
            .unwrap();

        let mut b = book("b1", "Cosmos");
        b.category_id = Some("c1".into());
        books.create(&b).await.unwrap();

        categories.delete("c1").await.unwrap();
        let stored = books.find_by_id("b1").await.unwrap().unwrap();
        assert!(stored.category_id.is_none());
    }

    #[tokio::test]
    async fn test_last_admin_role_is_kept() {
        let repo = UserRepository::new(setup());
        let admin = User {
            id: "u1".into(),
            username: "root".into(),
            email: "root@example.com".into(),
            password_hash: "x".into(),
            role: ROLE_ADMIN.into(),
            mfa_enabled: 0,
            created_at: now_timestamp(),
        };
        repo.create(&admin).await.unwrap();

        let demoted = User {
            role: crate::db::models::ROLE_EDITOR.into(),
            ..admin.clone()
        };
        let err = repo.update_retaining_admin(&demoted).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        assert_eq!(repo.find_by_id("u1").await.unwrap().unwrap().role, ROLE_ADMIN);

        let second = User {
            id: "u2".into(),
            username: "deputy".into(),
            email: "deputy@example.com".into(),
            ..admin.clone()
        };
        repo.create(&second).await.unwrap();
        repo.update_retaining_admin(&demoted).await.unwrap();
        assert_eq!(repo.find_by_id("u1").await.unwrap().unwrap().role, "editor");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let repo = AuthorRepository::new(setup());
        let err = repo.delete("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_favorites() {
        let db = setup();
        let books = BookRepository::new(db.clone());
        let readers = ReaderRepository::new(db);

        books.create(&book("b1", "Dune")).await.unwrap();
        readers
            .create(&Reader {
                id: "r1".into(),
                email: "Reader@Example.com".into(),
                password_hash: "h".into(),
                full_name: "A Reader".into(),
                phone: None,
                created_at: now_timestamp(),
            })
            .await
            .unwrap();

        assert!(readers.find_by_email("reader@example.com").await.unwrap().is_some());
        assert!(readers.add_favorite("r1", "b1", &now_timestamp()).await.unwrap());
        assert!(!readers.add_favorite("r1", "b1", &now_timestamp()).await.unwrap());
        assert!(readers.is_favorite("r1", "b1").await.unwrap());

        let (favorites, total) = books
            .find_page(
                BookFilter {
                    favorite_of: Some("r1".into()),
                    ..Default::default()
                },
                PageQuery::default(),
            )
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(favorites[0].id, "b1");

        books.delete("b1").await.unwrap();
        assert!(!readers.is_favorite("r1", "b1").await.unwrap());
        assert!(!readers.remove_favorite("r1", "b1").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let repo = SessionRepository::new(setup());
        let session = SessionRecord {
            id: "s1".into(),
            subject_id: "u1".into(),
            subject_kind: "user".into(),
            created_at: "2024-01-01T00:00:00.000Z".into(),
            expires_at: "2099-01-01T00:00:00.000Z".into(),
            revoked: 0,
        };
        repo.insert(&session).await.unwrap();

        let now = now_timestamp();
        assert!(repo.find_active("s1", &now).await.unwrap().is_some());
        assert!(repo
            .find_active("s1", "2100-01-01T00:00:00.000Z")
            .await
            .unwrap()
            .is_none());

        repo.revoke("s1").await.unwrap();
        assert!(repo.find_active("s1", &now).await.unwrap().is_none());
        assert_eq!(repo.purge(&now).await.unwrap(), 1);
    }
}
