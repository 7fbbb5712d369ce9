//! Server-side sessions
//!
//! Every access token names a session (`sid`). Logging out revokes the
//! session, which invalidates the token before it expires. Sessions live in
//! SQLite by default, or in Redis with a TTL when `redis.url` is configured.

use crate::auth::models::SubjectKind;
use crate::core::error::Result;
use crate::core::utils::{format_timestamp, now_timestamp};
use crate::db::models::SessionRecord;
use crate::db::repository::SessionRepository;
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Owner of a live session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub subject_id: String,
    pub kind: SubjectKind,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session and return its id
    async fn create(&self, kind: SubjectKind, subject_id: &str, ttl_secs: u64) -> Result<String>;

    /// Owner of the session, if it exists and is neither expired nor revoked
    async fn lookup(&self, session_id: &str) -> Result<Option<SessionInfo>>;

    async fn revoke(&self, session_id: &str) -> Result<()>;

    /// Revoke every session of one subject (password change, account deletion)
    async fn revoke_subject(&self, kind: SubjectKind, subject_id: &str) -> Result<()>;

    /// Drop dead sessions; stores with native expiry have nothing to do
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Sessions stored in the `sessions` table
pub struct SqliteSessionStore {
    repo: Arc<SessionRepository>,
}

impl SqliteSessionStore {
    pub fn new(repo: Arc<SessionRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, kind: SubjectKind, subject_id: &str, ttl_secs: u64) -> Result<String> {
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            subject_id: subject_id.to_string(),
            subject_kind: kind.as_str().to_string(),
            created_at: format_timestamp(now),
            expires_at: format_timestamp(now + chrono::Duration::seconds(ttl_secs as i64)),
            revoked: 0,
        };
        self.repo.insert(&record).await?;
        Ok(record.id)
    }

    async fn lookup(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let record = self.repo.find_active(session_id, &now_timestamp()).await?;
        Ok(record.and_then(|r| {
            SubjectKind::parse(&r.subject_kind).map(|kind| SessionInfo {
                subject_id: r.subject_id,
                kind,
            })
        }))
    }

    async fn revoke(&self, session_id: &str) -> Result<()> {
        self.repo.revoke(session_id).await
    }

    async fn revoke_subject(&self, kind: SubjectKind, subject_id: &str) -> Result<()> {
        self.repo.revoke_subject(kind.as_str(), subject_id).await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.repo.purge(&now_timestamp()).await
    }
}

/// Sessions stored as Redis keys with `EX` expiry
pub struct RedisSessionStore {
    connection: redis::aio::ConnectionManager,
    prefix: String,
}

impl RedisSessionStore {
    pub fn new(connection: redis::aio::ConnectionManager) -> Self {
        Self {
            connection,
            prefix: "book-api:session".to_string(),
        }
    }

    fn session_key(&self, session_id: &str) -> String {
        format!("{}:{}", self.prefix, session_id)
    }

    fn subject_key(&self, kind: SubjectKind, subject_id: &str) -> String {
        format!("{}:subject:{}:{}", self.prefix, kind.as_str(), subject_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn create(&self, kind: SubjectKind, subject_id: &str, ttl_secs: u64) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let info = serde_json::to_string(&SessionInfo {
            subject_id: subject_id.to_string(),
            kind,
        })?;

        let mut conn = self.connection.clone();
        let subject_key = self.subject_key(kind, subject_id);
        conn.set_ex::<_, _, ()>(self.session_key(&session_id), info, ttl_secs)
            .await?;
        conn.sadd::<_, _, ()>(&subject_key, &session_id).await?;
        conn.expire::<_, ()>(&subject_key, ttl_secs as i64).await?;

        Ok(session_id)
    }

    async fn lookup(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.session_key(session_id)).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn revoke(&self, session_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(self.session_key(session_id)).await?;
        Ok(())
    }

    async fn revoke_subject(&self, kind: SubjectKind, subject_id: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        let subject_key = self.subject_key(kind, subject_id);
        let sessions: Vec<String> = conn.smembers(&subject_key).await?;

        let mut keys: Vec<String> = sessions.iter().map(|id| self.session_key(id)).collect();
        keys.push(subject_key);
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseManager;

    fn store() -> SqliteSessionStore {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        SqliteSessionStore::new(Arc::new(SessionRepository::new(db)))
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = store();
        let sid = store.create(SubjectKind::Reader, "r1", 3600).await.unwrap();

        let info = store.lookup(&sid).await.unwrap().unwrap();
        assert_eq!(info.subject_id, "r1");
        assert_eq!(info.kind, SubjectKind::Reader);
        assert!(store.lookup("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke() {
        let store = store();
        let sid = store.create(SubjectKind::User, "u1", 3600).await.unwrap();
        store.revoke(&sid).await.unwrap();
        assert!(store.lookup(&sid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_subject_only_touches_that_subject() {
        let store = store();
        let a = store.create(SubjectKind::User, "u1", 3600).await.unwrap();
        let b = store.create(SubjectKind::User, "u1", 3600).await.unwrap();
        let other = store.create(SubjectKind::Reader, "u1", 3600).await.unwrap();

        store.revoke_subject(SubjectKind::User, "u1").await.unwrap();
        assert!(store.lookup(&a).await.unwrap().is_none());
        assert!(store.lookup(&b).await.unwrap().is_none());
        assert!(store.lookup(&other).await.unwrap().is_some());

        assert_eq!(store.purge_expired().await.unwrap(), 2);
    }
}
