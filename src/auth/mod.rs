//! Authentication module
//!
//! This module provides authentication functionality including:
//! - Staff and reader login, reader registration
//! - JWT token generation and validation backed by server-side sessions
//! - Email one-time codes for staff accounts with MFA enabled
//! - Password hashing and verification
//! - Authentication middleware

pub mod handlers;
pub mod jwt;
pub mod mfa;
pub mod middleware;
pub mod models;
pub mod password;
pub mod session;

pub use jwt::{generate_token, validate_token, Claims};
pub use middleware::{authenticate, AuthUser};
pub use models::SubjectKind;
pub use password::{hash_password, verify_password};
pub use session::{SessionStore, SqliteSessionStore};

use crate::core::config::SecurityConfig;

/// Token and password settings used when issuing sessions
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl: u64,
    pub session_ttl: u64,
    pub bcrypt_cost: u32,
}

impl From<&SecurityConfig> for AuthSettings {
    fn from(config: &SecurityConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            token_ttl: config.token_ttl,
            session_ttl: config.session_ttl,
            bcrypt_cost: config.bcrypt_cost,
        }
    }
}
