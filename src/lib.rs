//! Book API Backend Library
//!
//! This library provides the book catalog backend: database management,
//! authentication, notifications and the REST API.

pub mod api;
pub mod auth;
pub mod core;
pub mod db;

// Re-export commonly used types
pub use api::ApiServer;
pub use crate::core::{Config, NotificationHub};
pub use db::DatabaseManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = anyhow::Result<T>;
