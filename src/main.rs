//! Book API Backend
//!
//! Catalog server for books, authors and categories with staff and reader
//! accounts.

use book_api::{api, core, db};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Initialize logging system based on configuration
    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Book API v{}", book_api::VERSION);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration"
    );
    info!(path = ?config.database.path, "Database configuration");
    if config.security.jwt_secret == "change-this-secret-in-production" {
        tracing::warn!("Using the default JWT secret; set security.jwt_secret before deploying");
    }

    let upload_dir = &config.storage.upload_dir;
    if !upload_dir.exists() {
        info!("Creating upload directory: {:?}", upload_dir);
        std::fs::create_dir_all(upload_dir)
            .map_err(|e| anyhow::anyhow!("Failed to create directory {:?}: {}", upload_dir, e))?;
    }

    // Open the database; pending migrations run on open
    info!("Initializing database...");
    let db = Arc::new(db::DatabaseManager::new(
        &config.database.path,
        config.database.connection_pool_size as u32,
        std::time::Duration::from_millis(config.database.busy_timeout),
    )?);
    info!("Database initialized successfully");

    ensure_admin_user(db.clone(), &config.security).await?;

    let server_url = format!("http://{}:{}", config.server.host, config.server.port);
    let server = api::ApiServer::new(config, db).await?;
    info!(url = %server_url, "Server ready - starting to serve requests");

    // Start serving (this will block until shutdown signal)
    server.serve().await?;

    Ok(())
}

/// Create the configured administrator when no staff account exists
async fn ensure_admin_user(
    db: Arc<db::DatabaseManager>,
    security: &core::config::SecurityConfig,
) -> Result<()> {
    use book_api::auth::password::hash_password_with_cost;
    use book_api::core::utils::now_timestamp;
    use book_api::db::models::{User, ROLE_ADMIN};
    use book_api::db::repository::{Repository, UserRepository};
    use uuid::Uuid;

    let user_repo = UserRepository::new(db);
    if user_repo.count().await? > 0 {
        return Ok(());
    }

    info!("No staff users found, creating the bootstrap administrator...");
    let admin_user = User {
        id: Uuid::new_v4().to_string(),
        username: security.admin_username.clone(),
        email: security.admin_email.to_lowercase(),
        password_hash: hash_password_with_cost(&security.admin_password, security.bcrypt_cost)?,
        role: ROLE_ADMIN.to_string(),
        mfa_enabled: 0,
        created_at: now_timestamp(),
    };
    user_repo.create(&admin_user).await?;
    info!(username = %admin_user.username, "Bootstrap administrator created");

    Ok(())
}
