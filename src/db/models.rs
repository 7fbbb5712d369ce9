//! Database models
//!
//! Data structures representing database tables

use serde::{Deserialize, Serialize};

/// Category record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

/// Author record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub biography: Option<String>,
    pub birth_year: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

/// Book record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub published_year: Option<i32>,
    pub page_count: Option<i32>,
    pub price: Option<f64>,
    pub category_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Uploaded image attached to a book
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookImage {
    pub id: String,
    pub book_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    pub stored_path: String,
    pub created_at: String,
}

/// Staff user record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String, // 'admin' | 'editor'
    pub mfa_enabled: i32, // 0 or 1
    pub created_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";

/// Reader (client) record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reader {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub created_at: String,
}

/// Favorite book of a reader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteBook {
    pub reader_id: String,
    pub book_id: String,
    pub created_at: String,
}

/// Server-side session referenced by issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub subject_id: String,
    pub subject_kind: String, // 'user' | 'reader'
    pub created_at: String,
    pub expires_at: String,
    pub revoked: i32,
}

/// Pending one-time-code challenge for a staff login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub id: String,
    pub user_id: String,
    pub code_hash: String,
    pub attempts: i32,
    pub expires_at: String,
    pub created_at: String,
}
