//! Structured logging
//!
//! Sets up the global `tracing` subscriber: JSON or text output, an env
//! filter seeded from the configured level, and either stdout or a
//! size-rotated log file behind a non-blocking writer.

use crate::core::config::LoggingConfig;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Keeps the non-blocking writer alive; dropping it flushes pending records
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the global subscriber from configuration
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_log_level(&config.level)?;

        // RUST_LOG wins over the configured level when present
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

        let (writer, guard) = match config.output.as_str() {
            "stdout" => tracing_appender::non_blocking(io::stdout()),
            "file" => {
                let log_file = config
                    .log_file
                    .as_ref()
                    .context("log_file must be specified when output is 'file'")?;

                if let Some(parent) = log_file.parent() {
                    std::fs::create_dir_all(parent).context("Failed to create log directory")?;
                }

                let appender =
                    create_rolling_appender(log_file, config.max_file_size, config.max_backups)?;
                tracing_appender::non_blocking(appender)
            }
            other => anyhow::bail!("Invalid output configuration: {}", other),
        };

        let fmt_layer = match config.format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .boxed(),
            "text" => fmt::layer()
                .with_writer(writer)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .boxed(),
            other => anyhow::bail!("Invalid format configuration: {}", other),
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("Failed to initialize tracing subscriber")?;

        tracing::info!(
            level = %config.level,
            format = %config.format,
            output = %config.output,
            "Logging system initialized"
        );

        Ok(Logger {
            _guard: Some(guard),
        })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {}", level),
    }
}

fn create_rolling_appender(
    log_file: &Path,
    max_file_size: usize,
    max_backups: usize,
) -> Result<RollingFileAppender> {
    let directory = log_file
        .parent()
        .context("Log file must have a parent directory")?;

    let filename = log_file
        .file_name()
        .context("Log file must have a filename")?
        .to_str()
        .context("Log filename must be valid UTF-8")?;

    Ok(RollingFileAppender::new(
        directory.to_path_buf(),
        filename.to_string(),
        max_file_size,
        max_backups,
    ))
}

/// File writer that rotates `name`, `name.1` .. `name.N` once the size limit is hit
pub struct RollingFileAppender {
    directory: PathBuf,
    filename: String,
    max_file_size: usize,
    max_backups: usize,
    current_file: Mutex<Option<File>>,
    current_size: AtomicUsize,
}

impl RollingFileAppender {
    pub fn new(directory: PathBuf, filename: String, max_file_size: usize, max_backups: usize) -> Self {
        Self {
            directory,
            filename,
            max_file_size,
            max_backups,
            current_file: Mutex::new(None),
            current_size: AtomicUsize::new(0),
        }
    }

    fn current_path(&self) -> PathBuf {
        self.directory.join(&self.filename)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}", self.filename, index))
    }

    fn lock_file(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        self.current_file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))
    }

    fn rotate(&self) -> io::Result<()> {
        *self.lock_file()? = None;

        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(i + 1))?;
            }
        }

        let current = self.current_path();
        if current.exists() {
            std::fs::rename(&current, self.backup_path(1))?;
        }

        self.current_size.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn open_file(&self) -> io::Result<MutexGuard<'_, Option<File>>> {
        let mut guard = self.lock_file()?;

        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.current_path())?;
            self.current_size
                .store(file.metadata()?.len() as usize, Ordering::SeqCst);
            *guard = Some(file);
        }

        Ok(guard)
    }
}

impl io::Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let current_size = self.current_size.load(Ordering::SeqCst);
        if current_size > 0 && current_size + buf.len() > self.max_file_size {
            self.rotate()?;
        }

        let mut guard = self.open_file()?;
        let written = match guard.as_mut() {
            Some(file) => file.write(buf)?,
            None => return Err(io::Error::new(io::ErrorKind::Other, "log file not open")),
        };

        self.current_size.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.lock_file()?.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("debug"), Ok(Level::DEBUG)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("error"), Ok(Level::ERROR)));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_rolling_appender_paths() {
        let appender = RollingFileAppender::new(
            PathBuf::from("/tmp/logs"),
            "api.log".to_string(),
            1024,
            5,
        );

        assert_eq!(appender.current_path(), PathBuf::from("/tmp/logs/api.log"));
        assert_eq!(appender.backup_path(1), PathBuf::from("/tmp/logs/api.log.1"));
    }

    #[test]
    fn test_rolling_appender_rotates() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut appender =
            RollingFileAppender::new(dir.path().to_path_buf(), "api.log".to_string(), 16, 2);

        appender.write_all(b"0123456789").unwrap();
        appender.write_all(b"0123456789").unwrap();
        appender.flush().unwrap();

        assert!(dir.path().join("api.log").exists());
        assert!(dir.path().join("api.log.1").exists());
        let rotated = std::fs::read(dir.path().join("api.log.1")).unwrap();
        assert_eq!(rotated, b"0123456789");
    }
}
