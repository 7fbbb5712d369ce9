//! Database manager implementation
//!
//! This module provides database connection management with:
//! - SQLite connection pool using r2d2
//! - Async wrapper for blocking database operations
//! - Transaction support

use crate::core::error::{ApiError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;

/// Database manager with connection pool
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<SqliteConnectionManager>,
    db_path: PathBuf,
}

fn pool_error(e: r2d2::Error) -> ApiError {
    ApiError::TaskError(format!("Database pool unavailable: {}", e))
}

impl DatabaseManager {
    /// Open (or create) the database file and run pending migrations
    pub fn new(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(pool_error)?;

        let manager = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        manager.migrate()?;

        Ok(manager)
    }

    /// In-memory database for tests
    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        // Every in-memory connection is its own database, so keep exactly one
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .map_err(pool_error)?;

        let manager = Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        };
        manager.migrate()?;

        Ok(manager)
    }

    pub fn get_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(pool_error)
    }

    /// Run a blocking database closure on the blocking thread pool
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let conn = pool.get().map_err(pool_error)?;
            f(&conn)
        })
        .await
        .map_err(|e| ApiError::TaskError(format!("Database task panicked: {}", e)))?
    }

    /// Run a closure inside a transaction; it commits on `Ok` and rolls back on `Err`
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(pool_error)?;
            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| ApiError::TaskError(format!("Transaction task panicked: {}", e)))?
    }

    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.get_connection()?;
        crate::db::migrations::run_migrations(&mut conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db() -> (DatabaseManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let manager = DatabaseManager::new(&db_path, 4, Duration::from_secs(5)).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_database_manager_creation() {
        let (manager, _temp_dir) = create_test_db();
        assert_eq!(manager.pool_size(), 4);
        assert!(manager.get_connection().is_ok());
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let (manager, _temp_dir) = create_test_db();

        let result: Result<()> = manager
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO categories (id, name) VALUES ('c1', 'Poetry')",
                    [],
                )?;
                Err(ApiError::InvalidRequest("abort".into()))
            })
            .await;
        assert!(result.is_err());

        let count: i64 = manager
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let manager = DatabaseManager::new_in_memory().unwrap();

        let result = manager
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO book_authors (book_id, author_id) VALUES ('missing', 'missing')",
                    [],
                )?;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ApiError::InvalidReference(_))));
    }
}
