//! Authentication request/response models

use crate::db::models::{Reader, User};
use serde::{Deserialize, Serialize};

/// Who a token was issued to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    User,
    Reader,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "user",
            SubjectKind::Reader => "reader",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(SubjectKind::User),
            "reader" => Some(SubjectKind::Reader),
            _ => None,
        }
    }
}

/// Staff login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Second step of a staff login with MFA enabled
#[derive(Debug, Deserialize)]
pub struct MfaVerifyRequest {
    pub challenge_id: String,
    pub code: String,
}

/// Reader registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub phone: Option<String>,
}

/// Reader login request
#[derive(Debug, Deserialize)]
pub struct ReaderLoginRequest {
    pub email: String,
    pub password: String,
}

/// Public view of the authenticated principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalInfo {
    pub id: String,
    pub kind: SubjectKind,
    /// Username for staff, email for readers
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl From<&User> for PrincipalInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            kind: SubjectKind::User,
            name: user.username.clone(),
            email: user.email.clone(),
            role: Some(user.role.clone()),
        }
    }
}

impl From<&Reader> for PrincipalInfo {
    fn from(reader: &Reader) -> Self {
        Self {
            id: reader.id.clone(),
            kind: SubjectKind::Reader,
            name: reader.full_name.clone(),
            email: reader.email.clone(),
            role: None,
        }
    }
}

/// Successful login
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub principal: PrincipalInfo,
}

/// Login paused until the emailed code is verified
#[derive(Debug, Serialize, Deserialize)]
pub struct MfaChallengeResponse {
    pub mfa_required: bool,
    pub challenge_id: String,
    pub expires_in: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_kind_wire_format() {
        assert_eq!(serde_json::to_string(&SubjectKind::Reader).unwrap(), "\"reader\"");
        assert_eq!(SubjectKind::parse("user"), Some(SubjectKind::User));
        assert_eq!(SubjectKind::parse("admin"), None);
        assert_eq!(SubjectKind::User.as_str(), "user");
    }
}
