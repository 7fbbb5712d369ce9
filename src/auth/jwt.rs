//! Access token signing and validation (HS256)

use crate::auth::models::SubjectKind;
use crate::core::error::{ApiError, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by every access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User or reader id
    pub sub: String,
    pub kind: SubjectKind,
    /// Staff role; `None` for readers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Server-side session backing this token
    pub sid: String,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn new(
        sub: &str,
        kind: SubjectKind,
        role: Option<&str>,
        sid: &str,
        ttl_secs: u64,
    ) -> Result<Self> {
        let now = chrono::Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::seconds(ttl_secs as i64))
            .ok_or_else(|| {
                ApiError::AuthenticationError("Failed to calculate expiration".to_string())
            })?;

        Ok(Self {
            sub: sub.to_string(),
            kind,
            role: role.map(str::to_string),
            sid: sid.to_string(),
            iat: now.timestamp() as usize,
            exp: expiration.timestamp() as usize,
        })
    }
}

/// Sign claims into a compact JWT
pub fn generate_token(claims: &Claims, secret: &str) -> Result<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::AuthenticationError(format!("Failed to generate token: {}", e)))
}

/// Validate a JWT (signature and expiry) and extract its claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ApiError::AuthenticationError(format!("Invalid token: {}", e)))?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-value";

    #[test]
    fn test_token_round_trip_keeps_claims() {
        let claims = Claims::new("u1", SubjectKind::User, Some("admin"), "s1", 3600).unwrap();
        let token = generate_token(&claims, SECRET).unwrap();

        let decoded = validate_token(&token, SECRET).unwrap();
        assert_eq!(decoded, claims);
        assert!(decoded.exp > decoded.iat);
    }

    #[test]
    fn test_reader_token_has_no_role() {
        let claims = Claims::new("r1", SubjectKind::Reader, None, "s2", 60).unwrap();
        let token = generate_token(&claims, SECRET).unwrap();
        let decoded = validate_token(&token, SECRET).unwrap();
        assert_eq!(decoded.kind, SubjectKind::Reader);
        assert!(decoded.role.is_none());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let claims = Claims::new("u1", SubjectKind::User, None, "s1", 60).unwrap();
        let token = generate_token(&claims, SECRET).unwrap();
        let err = validate_token(&token, "another-secret-value").unwrap_err();
        assert!(matches!(err, ApiError::AuthenticationError(_)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let mut claims = Claims::new("u1", SubjectKind::User, None, "s1", 60).unwrap();
        // Beyond the default 60s leeway
        claims.exp = claims.iat - 3600;
        let token = generate_token(&claims, SECRET).unwrap();
        assert!(validate_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(validate_token("not.a.token", SECRET).is_err());
    }
}
