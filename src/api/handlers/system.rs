use super::AppState;
use crate::api::models::{
    ComponentHealth, ComponentStatus, ComponentsHealth, HealthResponse, HealthStatus,
};
use crate::core::utils::now_timestamp;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

/// Handler for GET /health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_database_health(&state).await;
    let notifications = ComponentHealth {
        status: ComponentStatus::Healthy,
        message: None,
        details: Some(serde_json::json!({
            "subscribers": state.notifications.subscriber_count(),
            "instance_id": state.notifications.instance_id(),
        })),
    };

    let (status, code) = if database.status == ComponentStatus::Healthy {
        (HealthStatus::Healthy, StatusCode::OK)
    } else {
        (HealthStatus::Unhealthy, StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = HealthResponse {
        status,
        version: crate::VERSION.to_string(),
        components: ComponentsHealth {
            database,
            notifications,
        },
        timestamp: now_timestamp(),
    };

    (code, Json(response))
}

async fn check_database_health(state: &AppState) -> ComponentHealth {
    match state.book_repo.count().await {
        Ok(books) => ComponentHealth {
            status: ComponentStatus::Healthy,
            message: Some("Database is operational".to_string()),
            details: Some(serde_json::json!({
                "books": books,
                "pool_size": state.db.pool_size(),
            })),
        },
        Err(e) => {
            tracing::error!("Health check database query failed: {}", e);
            ComponentHealth {
                status: ComponentStatus::Unhealthy,
                message: Some("Database query failed".to_string()),
                details: None,
            }
        }
    }
}
