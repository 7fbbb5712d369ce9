//! Email one-time codes for staff logins
//!
//! A challenge stores only a SHA-256 of the code. It expires after
//! `security.mfa_code_ttl` seconds and is discarded after too many wrong
//! guesses.

use crate::core::error::{ApiError, Result};
use crate::core::utils::{format_timestamp, now_timestamp};
use crate::db::models::MfaChallenge;
use crate::db::repository::{MfaAttempt, MfaChallengeRepository};
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const CODE_LENGTH: usize = 6;

const INCORRECT_CODE: &str = "Incorrect code";
const TOO_MANY_ATTEMPTS: &str = "Too many attempts, please log in again";
const EXPIRED_CODE: &str = "Invalid or expired code";

/// Random zero-padded numeric code
pub fn generate_code() -> String {
    let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", value, width = CODE_LENGTH)
}

/// Codes are bound to their challenge so equal codes never share a hash
fn hash_code(challenge_id: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_id.as_bytes());
    hasher.update(b":");
    hasher.update(code.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct MfaService {
    repo: Arc<MfaChallengeRepository>,
    code_ttl_secs: u64,
    max_attempts: u32,
}

/// A freshly issued challenge; `code` must be delivered out of band
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge_id: String,
    pub code: String,
    pub expires_in: u64,
}

impl MfaService {
    pub fn new(repo: Arc<MfaChallengeRepository>, code_ttl_secs: u64, max_attempts: u32) -> Self {
        Self {
            repo,
            code_ttl_secs,
            max_attempts,
        }
    }

    /// Issue a challenge for `user_id`, replacing any pending one
    pub async fn start(&self, user_id: &str) -> Result<IssuedChallenge> {
        let now = Utc::now();
        let challenge_id = Uuid::new_v4().to_string();
        let code = generate_code();

        let challenge = MfaChallenge {
            id: challenge_id.clone(),
            user_id: user_id.to_string(),
            code_hash: hash_code(&challenge_id, &code),
            attempts: 0,
            expires_at: format_timestamp(
                now + chrono::Duration::seconds(self.code_ttl_secs as i64),
            ),
            created_at: format_timestamp(now),
        };
        self.repo.replace_for_user(&challenge).await?;

        info!(user_id = %user_id, "MFA challenge issued");

        Ok(IssuedChallenge {
            challenge_id,
            code,
            expires_in: self.code_ttl_secs,
        })
    }

    /// Check a code; returns the user id once the challenge is satisfied
    pub async fn verify(&self, challenge_id: &str, code: &str) -> Result<String> {
        let candidate = hash_code(challenge_id, code);
        let outcome = self
            .repo
            .attempt(challenge_id, &candidate, self.max_attempts, &now_timestamp())
            .await?;

        match outcome {
            MfaAttempt::Accepted { user_id } => Ok(user_id),
            MfaAttempt::Rejected { user_id, remaining: 0 } => {
                warn!(user_id = %user_id, "MFA challenge exhausted");
                Err(ApiError::AuthenticationError(TOO_MANY_ATTEMPTS.to_string()))
            }
            MfaAttempt::Rejected { .. } => {
                Err(ApiError::AuthenticationError(INCORRECT_CODE.to_string()))
            }
            MfaAttempt::Unavailable => {
                Err(ApiError::AuthenticationError(EXPIRED_CODE.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseManager;

    async fn service(ttl: u64, max_attempts: u32) -> MfaService {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, role) \
                 VALUES ('u1', 'editor', 'editor@example.com', 'h', 'editor')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        MfaService::new(Arc::new(MfaChallengeRepository::new(db)), ttl, max_attempts)
    }

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_correct_code_is_single_use() {
        let mfa = service(300, 5).await;
        let issued = mfa.start("u1").await.unwrap();

        assert_eq!(mfa.verify(&issued.challenge_id, &issued.code).await.unwrap(), "u1");
        assert!(mfa.verify(&issued.challenge_id, &issued.code).await.is_err());
    }

    #[tokio::test]
    async fn test_attempts_are_limited() {
        let mfa = service(300, 2).await;
        let issued = mfa.start("u1").await.unwrap();
        let wrong = if issued.code == "000000" { "111111" } else { "000000" };

        assert!(mfa.verify(&issued.challenge_id, wrong).await.is_err());
        assert!(mfa.verify(&issued.challenge_id, wrong).await.is_err());
        // Exhausted: even the right code no longer works
        assert!(mfa.verify(&issued.challenge_id, &issued.code).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let mfa = service(0, 5).await;
        let issued = mfa.start("u1").await.unwrap();
        assert!(mfa.verify(&issued.challenge_id, &issued.code).await.is_err());
    }

    #[tokio::test]
    async fn test_new_challenge_replaces_old() {
        let mfa = service(300, 5).await;
        let first = mfa.start("u1").await.unwrap();
        let second = mfa.start("u1").await.unwrap();

        assert!(mfa.verify(&first.challenge_id, &first.code).await.is_err());
        assert!(mfa.verify(&second.challenge_id, &second.code).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_guesses_share_one_attempt_budget() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(
            DatabaseManager::new(
                &dir.path().join("mfa.db"),
                8,
                std::time::Duration::from_secs(10),
            )
            .unwrap(),
        );
        db.execute(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, role) \
                 VALUES ('u1', 'editor', 'editor@example.com', 'h', 'editor')",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();
        let mfa = Arc::new(MfaService::new(
            Arc::new(MfaChallengeRepository::new(db)),
            300,
            5,
        ));

        let issued = mfa.start("u1").await.unwrap();
        let wrong = if issued.code == "000000" { "111111" } else { "000000" };

        let mut guesses = tokio::task::JoinSet::new();
        for i in 0..40 {
            let mfa = mfa.clone();
            let challenge_id = issued.challenge_id.clone();
            let code = if i == 39 { issued.code.clone() } else { wrong.to_string() };
            guesses.spawn(async move { mfa.verify(&challenge_id, &code).await });
        }

        let mut compared = 0;
        while let Some(result) = guesses.join_next().await {
            match result.unwrap() {
                Ok(_) => compared += 1,
                Err(ApiError::AuthenticationError(m))
                    if m == INCORRECT_CODE || m == TOO_MANY_ATTEMPTS =>
                {
                    compared += 1
                }
                Err(ApiError::AuthenticationError(m)) => assert_eq!(m, EXPIRED_CODE),
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(compared <= 5, "{} guesses were compared", compared);
        assert!(mfa.verify(&issued.challenge_id, &issued.code).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_code_reports_remaining_state() {
        let mfa = service(300, 2).await;
        let issued = mfa.start("u1").await.unwrap();
        let wrong = if issued.code == "000000" { "111111" } else { "000000" };

        let first = mfa.verify(&issued.challenge_id, wrong).await.unwrap_err();
        assert!(first.to_string().contains(INCORRECT_CODE));
        let second = mfa.verify(&issued.challenge_id, wrong).await.unwrap_err();
        assert!(second.to_string().contains(TOO_MANY_ATTEMPTS));
        let third = mfa.verify(&issued.challenge_id, &issued.code).await.unwrap_err();
        assert!(third.to_string().contains(EXPIRED_CODE));
    }
}
