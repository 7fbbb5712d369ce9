//! HTTP Server implementation
//!
//! This module provides the HTTP server using Axum framework with:
//! - Configurable host/port binding
//! - Graceful shutdown handling
//! - Request timeouts
//! - CORS support
//! - Read-only serving of uploaded images under `/uploads`

use crate::api::handlers::AppState;
use crate::api::middleware::{
    security_headers_middleware, trace_id_middleware, RateLimiter, SecurityHeadersConfig,
};
use crate::api::routes::build_api_routes;
use crate::auth::session::{RedisSessionStore, SessionStore, SqliteSessionStore};
use crate::core::config::{Config, ServerConfig};
use crate::core::mailer::{LogMailer, Mailer, SmtpMailer};
use crate::core::notifications::{NotificationHub, RedisBridge};
use crate::db::manager::DatabaseManager;
use crate::db::repository::SessionRepository;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

/// HTTP API Server
pub struct ApiServer {
    router: Router,
    config: ServerConfig,
    state: AppState,
    limiter: RateLimiter,
    limiter_window: Duration,
}

impl ApiServer {
    /// Create a new API server with the given configuration and database manager
    ///
    /// When `redis.url` is set, sessions are kept in Redis and notifications
    /// are mirrored on the configured Redis channel.
    pub async fn new(config: Config, db: Arc<DatabaseManager>) -> anyhow::Result<Self> {
        let notifications = Arc::new(NotificationHub::new(
            config.notifications.history_size,
            config.notifications.channel_capacity,
        ));

        let sessions: Arc<dyn SessionStore> = match &config.redis.url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let connection = client.get_connection_manager().await?;
                info!("Using Redis for sessions and notification fan-out");

                let bridge =
                    RedisBridge::connect(client, config.notifications.redis_channel.clone())
                        .await?;
                notifications.attach_redis(bridge).await?;

                Arc::new(RedisSessionStore::new(connection))
            }
            None => Arc::new(SqliteSessionStore::new(Arc::new(SessionRepository::new(
                db.clone(),
            )))),
        };

        let mailer: Arc<dyn Mailer> = match SmtpMailer::from_config(&config.mail)? {
            Some(smtp) => {
                info!(host = ?config.mail.smtp_host, port = config.mail.smtp_port, "Using SMTP relay for email");
                Arc::new(smtp)
            }
            None => {
                warn!("No SMTP relay configured; emails are only logged");
                Arc::new(LogMailer::new(config.mail.from.clone()))
            }
        };

        let state = AppState::new(&config, db, sessions, mailer, notifications);
        let limiter = RateLimiter::new(
            config.security.rate_limit_requests,
            config.security.rate_limit_window,
        )
        .with_proxy_headers(config.security.trust_proxy_headers);
        let router = build_router(&config, state.clone(), limiter.clone());

        Ok(Self {
            router,
            config: config.server.clone(),
            state,
            limiter,
            limiter_window: Duration::from_secs(config.security.rate_limit_window),
        })
    }

    /// Start the HTTP server and listen for requests
    ///
    /// This method will block until the server is shut down gracefully.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let socket_addr: SocketAddr = addr.parse()?;

        self.spawn_maintenance();

        info!(
            host = %self.config.host,
            port = self.config.port,
            request_timeout = self.config.request_timeout,
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(socket_addr).await?;
        info!(addr = %socket_addr, "HTTP server listening");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    /// Periodic cleanup of expired sessions and idle rate-limit entries
    fn spawn_maintenance(&self) {
        let sessions = self.state.sessions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_PURGE_INTERVAL);
            loop {
                interval.tick().await;
                match sessions.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Purged expired sessions"),
                    Err(e) => warn!("Session purge failed: {}", e),
                }
            }
        });

        let limiter = self.limiter.clone();
        let window = self.limiter_window.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            loop {
                interval.tick().await;
                limiter.cleanup_expired().await;
            }
        });
    }

    /// Get a reference to the router
    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Build the full application: routes, uploads and global middleware
pub fn build_router(config: &Config, state: AppState, limiter: RateLimiter) -> Router {
    let security_headers = SecurityHeadersConfig::new(
        config.security.enable_hsts,
        config.security.hsts_max_age,
    );
    let uploads = ServeDir::new(state.uploads.root().to_path_buf());

    build_api_routes(state, limiter)
        .nest_service("/uploads", uploads)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(trace_id_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(&config.security.allowed_origins))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.server.request_timeout,
                )))
                .layer(middleware::from_fn_with_state(
                    security_headers,
                    security_headers_middleware,
                )),
        )
}

/// Build CORS layer from allowed origins configuration
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed_origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown...");
}
