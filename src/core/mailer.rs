//! Outgoing email
//!
//! The server only needs to send short transactional messages (login codes,
//! welcome notes). `SmtpMailer` delivers them through the configured relay.
//! Without a relay, `LogMailer` records them in the structured log with
//! secret-bearing bodies redacted; `MemoryMailer` keeps them in memory.

use crate::core::config::MailConfig;
use crate::core::error::{ApiError, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, info};

const REDACTED: &str = "[redacted]";

/// A plain-text email
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Body carries a secret and must never be logged
    #[serde(skip)]
    pub sensitive: bool,
}

impl Email {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
            sensitive: false,
        }
    }

    /// Login code message sent during a multi-factor login
    pub fn login_code(to: &str, code: &str, ttl_secs: u64) -> Self {
        Self {
            sensitive: true,
            ..Self::new(
                to,
                "Your book-api login code",
                format!(
                    "Your login code is {}.\nIt expires in {} minutes.",
                    code,
                    (ttl_secs / 60).max(1)
                ),
            )
        }
    }

    /// Body as it may appear in logs
    pub fn loggable_body(&self) -> &str {
        if self.sensitive {
            REDACTED
        } else {
            &self.body
        }
    }

    pub fn welcome(to: &str, full_name: &str) -> Self {
        Self::new(
            to,
            "Welcome to book-api",
            format!("Hello {},\nyour reader account is ready.", full_name),
        )
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<()>;
}

/// Mailer that emits each message as a structured log event
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<()> {
        info!(
            target: "book_api::mail",
            from = %self.from,
            to = %email.to,
            subject = %email.subject,
            body = %email.loggable_body(),
            "Email dispatched"
        );
        Ok(())
    }
}

/// Mailer that delivers through an SMTP relay
pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a relay transport; returns `None` when no SMTP host is configured
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>> {
        let Some(host) = config.smtp_host.as_deref() else {
            return Ok(None);
        };

        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| ApiError::MailError(format!("Invalid from address: {}", e)))?;

        let relay = if config.smtp_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        };
        let builder = relay
            .map_err(|e| ApiError::MailError(format!("Invalid SMTP relay {}: {}", host, e)))?
        .port(config.smtp_port);

        let builder = match (&config.smtp_username, &config.smtp_password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Some(Self {
            from,
            transport: builder.build(),
        }))
    }

    fn build_message(&self, email: &Email) -> Result<Message> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| ApiError::MailError(format!("Invalid recipient {}: {}", email.to, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|e| ApiError::MailError(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<()> {
        let message = self.build_message(&email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| ApiError::MailError(format!("SMTP delivery failed: {}", e)))?;

        debug!(
            target: "book_api::mail",
            to = %email.to,
            subject = %email.subject,
            "Email delivered"
        );
        Ok(())
    }
}

/// Mailer that keeps every message in memory
#[derive(Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<Email>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }

    pub fn last_to(&self, to: &str) -> Option<Email> {
        self.sent().into_iter().rev().find(|email| email.to == to)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: Email) -> Result<()> {
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(email);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_code_is_redacted_in_logs() {
        let email = Email::login_code("ed@example.com", "654321", 300);
        assert!(email.sensitive);
        assert_eq!(email.loggable_body(), REDACTED);
        assert!(!serde_json::to_string(&email).unwrap().contains("sensitive"));

        let welcome = Email::welcome("ada@example.com", "Ada");
        assert!(!welcome.sensitive);
        assert!(welcome.loggable_body().contains("Ada"));
    }

    #[tokio::test]
    async fn test_smtp_mailer_requires_host() {
        let mut config = crate::core::config::Config::defaults().unwrap().mail;
        assert!(SmtpMailer::from_config(&config).unwrap().is_none());

        config.smtp_host = Some("smtp.example.com".to_string());
        config.smtp_username = Some("mailer".to_string());
        config.smtp_password = Some("secret".to_string());
        let mailer = SmtpMailer::from_config(&config).unwrap().unwrap();
        let message = mailer
            .build_message(&Email::welcome("ada@example.com", "Ada"))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("To: ada@example.com"));
        assert!(raw.contains("Subject: Welcome to book-api"));

        let err = mailer
            .build_message(&Email::welcome("not an address", "Ada"))
            .unwrap_err();
        assert!(matches!(err, ApiError::MailError(_)));
    }

    #[test]
    fn test_login_code_body() {
        let email = Email::login_code("ed@example.com", "123456", 300);
        assert_eq!(email.to, "ed@example.com");
        assert!(email.body.contains("123456"));
        assert!(email.body.contains("5 minutes"));
    }

    #[tokio::test]
    async fn test_memory_mailer_records_messages() {
        let mailer = MemoryMailer::new();
        mailer.send(Email::welcome("a@example.com", "Ann")).await.unwrap();
        mailer.send(Email::login_code("b@example.com", "000111", 60)).await.unwrap();

        assert_eq!(mailer.sent().len(), 2);
        assert!(mailer.last_to("b@example.com").unwrap().body.contains("000111"));
        assert!(mailer.last_to("c@example.com").is_none());
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_messages() {
        let mailer = LogMailer::new("no-reply@example.com");
        assert!(mailer.send(Email::welcome("a@example.com", "Ann")).await.is_ok());
    }
}
