//! Request/response bodies for staff users and readers

use super::common::{
    double_option, normalize_optional, require_text, validate_email, validate_username, Validate,
};
use crate::auth::password::validate_password_strength;
use crate::core::error::{ApiError, Result};
use crate::db::models::{Reader, User, ROLE_ADMIN, ROLE_EDITOR};
use serde::{Deserialize, Serialize};

fn validate_role(role: &str) -> Result<()> {
    if role == ROLE_ADMIN || role == ROLE_EDITOR {
        Ok(())
    } else {
        Err(ApiError::ValidationError(format!(
            "Role must be '{}' or '{}'",
            ROLE_ADMIN, ROLE_EDITOR
        )))
    }
}

// ----- staff users --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
    #[serde(default)]
    pub mfa_enabled: bool,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> Result<()> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_password_strength(&self.password)?;
        if let Some(role) = &self.role {
            validate_role(role)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<String>,
    pub mfa_enabled: Option<bool>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<()> {
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(password) = &self.password {
            validate_password_strength(password)?;
        }
        if let Some(role) = &self.role {
            validate_role(role)?;
        }
        Ok(())
    }
}

/// Staff user without credentials
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub mfa_enabled: bool,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            mfa_enabled: user.mfa_enabled != 0,
            created_at: user.created_at,
        }
    }
}

// ----- readers ------------------------------------------------------------

pub fn validate_registration(
    email: &str,
    password: &str,
    full_name: &str,
    phone: Option<&str>,
) -> Result<()> {
    validate_email(email)?;
    validate_password_strength(password)?;
    require_text("full_name", full_name, 200)?;
    if let Some(phone) = phone {
        validate_phone(phone)?;
    }
    Ok(())
}

fn validate_phone(phone: &str) -> Result<()> {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    if allowed && (6..=20).contains(&digits) {
        Ok(())
    } else {
        Err(ApiError::ValidationError(format!("Invalid phone number: {}", phone)))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReaderRequest {
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    pub password: Option<String>,
    /// Required when changing the password
    pub current_password: Option<String>,
}

impl Validate for UpdateReaderRequest {
    fn validate(&self) -> Result<()> {
        if let Some(full_name) = &self.full_name {
            require_text("full_name", full_name, 200)?;
        }
        if let Some(Some(phone)) = &self.phone {
            if !phone.trim().is_empty() {
                validate_phone(phone)?;
            }
        }
        if let Some(password) = &self.password {
            validate_password_strength(password)?;
            if self.current_password.is_none() {
                return Err(ApiError::ValidationError(
                    "current_password is required to change the password".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl UpdateReaderRequest {
    /// Copy profile fields; the password is handled by the caller
    pub fn apply_profile(&mut self, reader: &mut Reader) {
        if let Some(full_name) = self.full_name.take() {
            reader.full_name = full_name.trim().to_string();
        }
        if let Some(phone) = self.phone.take() {
            reader.phone = normalize_optional(phone);
        }
    }
}

/// Reader without credentials
#[derive(Debug, Serialize, Deserialize)]
pub struct ReaderResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub created_at: String,
}

impl From<Reader> for ReaderResponse {
    fn from(reader: Reader) -> Self {
        Self {
            id: reader.id,
            email: reader.email,
            full_name: reader.full_name,
            phone: reader.phone,
            created_at: reader.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FavoriteResponse {
    pub book_id: String,
    pub favorite: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_response_omits_password_hash() {
        let user = User {
            id: "u1".into(),
            username: "admin".into(),
            email: "admin@example.com".into(),
            password_hash: "secret-hash".into(),
            role: ROLE_ADMIN.into(),
            mfa_enabled: 1,
            created_at: "t".into(),
        };
        let json = serde_json::to_string(&UserResponse::from(user)).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("\"mfa_enabled\":true"));
    }

    #[test]
    fn test_create_user_validation() {
        let req = CreateUserRequest {
            username: "editor1".into(),
            email: "e@example.com".into(),
            password: "password123".into(),
            role: Some("owner".into()),
            mfa_enabled: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_registration_validation() {
        assert!(validate_registration("a@example.com", "password123", "Ann", Some("+1 555-0100")).is_ok());
        assert!(validate_registration("a@example.com", "short", "Ann", None).is_err());
        assert!(validate_registration("a@example.com", "password123", " ", None).is_err());
        assert!(validate_registration("a@example.com", "password123", "Ann", Some("call me")).is_err());
    }

    #[test]
    fn test_password_change_needs_current_password() {
        let req = UpdateReaderRequest {
            password: Some("new-password".into()),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }
}
