//! Configuration management

use clap::Parser;
use config::builder::{ConfigBuilder as Builder, DefaultState};
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid security configuration: {0}")]
    InvalidSecurity(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Invalid notification configuration: {0}")]
    InvalidNotifications(String),

    #[error("Invalid mail configuration: {0}")]
    InvalidMail(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// Prefix for environment overrides, e.g. `BOOK_API_SERVER__PORT=8080`
const ENV_PREFIX: &str = "BOOK_API";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub notifications: NotificationConfig,
    pub mail: MailConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_with_args(&cli_args)
    }

    /// Load configuration using already-parsed command-line arguments
    pub fn load_with_args(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(upload_dir) = &cli_args.upload_dir {
            builder = builder.set_override("storage.upload_dir", upload_dir.display().to_string())?;
        }
        if let Some(redis_url) = &cli_args.redis_url {
            builder = builder.set_override("redis.url", redis_url.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Configuration made only of defaults
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.security.validate()?;
        self.storage.validate()?;
        self.notifications.validate()?;
        self.mail.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 4000)?
        .set_default("server.request_timeout", 30)?
        .set_default("database.path", "./data/book-api.db")?
        .set_default("database.connection_pool_size", 10)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "json")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10485760)? // 10 MB
        .set_default("logging.max_backups", 5)?
        .set_default("security.jwt_secret", "change-this-secret-in-production")?
        .set_default("security.token_ttl", 86400)?
        .set_default("security.session_ttl", 604800)?
        .set_default("security.mfa_code_ttl", 300)?
        .set_default("security.mfa_max_attempts", 5)?
        .set_default("security.bcrypt_cost", 12)?
        .set_default("security.allowed_origins", vec!["*"])?
        .set_default("security.rate_limit_requests", 20)?
        .set_default("security.rate_limit_window", 60)?
        .set_default("security.enable_hsts", false)?
        .set_default("security.hsts_max_age", 31536000)?
        .set_default("security.trust_proxy_headers", false)?
        .set_default("security.admin_username", "admin")?
        .set_default("security.admin_email", "admin@localhost")?
        .set_default("security.admin_password", "admin123")?
        .set_default("storage.upload_dir", "./uploads")?
        .set_default("storage.max_upload_size", 5242880)? // 5 MB
        .set_default("notifications.history_size", 200)?
        .set_default("notifications.channel_capacity", 256)?
        .set_default("notifications.redis_channel", "book-api:notifications")?
        .set_default("mail.from", "no-reply@book-api.local")?
        .set_default("mail.smtp_port", 587)?
        .set_default("mail.smtp_starttls", true)?)
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Parser)]
#[command(name = "book-api")]
#[command(about = "Book catalog API server", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Directory for uploaded book images
    #[arg(long, value_name = "DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Redis URL for sessions and pub/sub (e.g. redis://127.0.0.1:6379)
    #[arg(long, value_name = "URL")]
    pub redis_url: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64, // seconds
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be greater than 0".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidServer(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(ConfigError::InvalidLogging(
                "max_file_size must be greater than 0".to_string(),
            ));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging(
                "max_backups must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub token_ttl: u64,    // seconds
    pub session_ttl: u64,  // seconds
    pub mfa_code_ttl: u64, // seconds
    pub mfa_max_attempts: u32,
    pub bcrypt_cost: u32,
    pub allowed_origins: Vec<String>,
    pub rate_limit_requests: usize,
    pub rate_limit_window: u64, // seconds
    pub enable_hsts: bool,
    pub hsts_max_age: u64, // seconds
    /// Take the client address from X-Forwarded-For / X-Real-IP (only behind a proxy)
    pub trust_proxy_headers: bool,
    pub admin_username: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::InvalidSecurity(
                "jwt_secret must be at least 16 characters".to_string(),
            ));
        }

        if self.token_ttl == 0 || self.session_ttl == 0 || self.mfa_code_ttl == 0 {
            return Err(ConfigError::InvalidSecurity(
                "token_ttl, session_ttl and mfa_code_ttl must be greater than 0".to_string(),
            ));
        }

        if self.mfa_max_attempts == 0 {
            return Err(ConfigError::InvalidSecurity(
                "mfa_max_attempts must be greater than 0".to_string(),
            ));
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidSecurity(
                "bcrypt_cost must be between 4 and 31".to_string(),
            ));
        }

        if self.allowed_origins.is_empty() {
            return Err(ConfigError::InvalidSecurity(
                "allowed_origins cannot be empty".to_string(),
            ));
        }

        if self.rate_limit_requests == 0 {
            return Err(ConfigError::InvalidSecurity(
                "rate_limit_requests must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window == 0 {
            return Err(ConfigError::InvalidSecurity(
                "rate_limit_window must be greater than 0".to_string(),
            ));
        }

        if self.enable_hsts && self.hsts_max_age == 0 {
            return Err(ConfigError::InvalidSecurity(
                "hsts_max_age must be greater than 0 when enable_hsts is true".to_string(),
            ));
        }

        if self.admin_username.is_empty() || self.admin_password.is_empty() {
            return Err(ConfigError::InvalidSecurity(
                "admin_username and admin_password cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub max_upload_size: usize, // bytes
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("upload_dir cannot be empty".to_string()));
        }

        if self.max_upload_size == 0 {
            return Err(ConfigError::InvalidStorage(
                "max_upload_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Redis is optional; without a URL sessions live in SQLite and pub/sub stays in-process
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub history_size: usize,
    pub channel_capacity: usize,
    pub redis_channel: String,
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidNotifications(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.redis_channel.is_empty() {
            return Err(ConfigError::InvalidNotifications(
                "redis_channel cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub from: String,
    /// SMTP relay; messages are only logged (without sensitive bodies) when unset
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_starttls: bool,
}

impl MailConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.from.contains('@') {
            return Err(ConfigError::InvalidMail(
                "from must be an email address".to_string(),
            ));
        }

        if self.smtp_host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(ConfigError::InvalidMail(
                "smtp_host must not be empty".to_string(),
            ));
        }

        if self.smtp_username.is_some() != self.smtp_password.is_some() {
            return Err(ConfigError::InvalidMail(
                "smtp_username and smtp_password must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::defaults().unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.storage.max_upload_size, 5 * 1024 * 1024);
        assert!(config.redis.url.is_none());
        assert_eq!(config.notifications.redis_channel, "book-api:notifications");
        assert!(!config.security.trust_proxy_headers);
        assert!(config.mail.smtp_host.is_none());
        assert_eq!(config.mail.smtp_port, 587);
    }

    #[test]
    fn test_smtp_credentials_come_in_pairs() {
        let mut config = Config::defaults().unwrap();
        config.mail.smtp_host = Some("smtp.example.com".to_string());
        config.mail.smtp_username = Some("mailer".to_string());
        assert!(matches!(
            config.mail.validate(),
            Err(ConfigError::InvalidMail(_))
        ));

        config.mail.smtp_password = Some("secret".to_string());
        assert!(config.mail.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 8088\n\n[redis]\nurl = \"redis://127.0.0.1:6379\"\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.redis.url.as_deref(), Some("redis://127.0.0.1:6379"));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/book-api.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = Config::defaults().unwrap();
        config.security.jwt_secret = "short".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSecurity(_))
        ));
    }

    #[test]
    fn test_logging_file_requires_path() {
        let mut config = Config::defaults().unwrap();
        config.logging.output = "file".to_string();
        assert!(matches!(
            config.logging.validate(),
            Err(ConfigError::InvalidLogging(_))
        ));
    }
}
