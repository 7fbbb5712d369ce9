//! Password hashing and verification using bcrypt

use crate::core::error::{ApiError, Result};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hash a password using bcrypt
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with_cost(password, bcrypt::DEFAULT_COST)
}

/// Hash with an explicit cost; tests use the minimum to stay fast
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost)
        .map_err(|e| ApiError::AuthenticationError(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash)
        .map_err(|e| ApiError::AuthenticationError(format!("Failed to verify password: {}", e)))
}

/// Reject passwords that are too short to be useful
pub fn validate_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::ValidationError(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password_with_cost("correct horse", 4).unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-bcrypt-hash").is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("short").is_err());
        assert!(validate_password_strength("long enough").is_ok());
    }
}
