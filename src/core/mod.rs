//! Core application module
//!
//! This module provides the core application layer including:
//! - Catalog business logic
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system
//! - Notification hub with optional Redis fan-out
//! - Outgoing mail, upload storage and pagination helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod notifications;
pub mod pagination;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use error::{ApiError, ErrorResponse, Result};
pub use logging::Logger;
pub use notifications::{Notification, NotificationHub};
pub use pagination::{Page, PageQuery};
pub use services::CatalogService;
pub use storage::UploadStore;
