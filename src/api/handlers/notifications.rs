use super::AppState;
use crate::auth::middleware::AuthUser;
use crate::core::error::Result;
use crate::core::notifications::Notification;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    /// Exact topic or a `prefix.*` pattern
    pub topic: Option<String>,
    pub limit: Option<usize>,
}

/// Handler for GET /api/notifications - Recent notifications, newest first
pub async fn list_notifications(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(
        state
            .notifications
            .history(query.topic.as_deref(), limit)
            .await,
    ))
}

/// Handler for GET /api/notifications/ws - Live notification stream
pub async fn notifications_ws(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::info!(subject = %user.id, topic = ?query.topic, "WebSocket subscriber connected");
    ws.on_upgrade(move |socket| stream_notifications(socket, state, query.topic))
}

async fn stream_notifications(socket: WebSocket, state: AppState, topic: Option<String>) {
    let mut updates = state.notifications.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(notification) => {
                    if topic.as_deref().map_or(false, |pattern| !notification.matches(pattern)) {
                        continue;
                    }
                    let payload = match serde_json::to_string(&notification) {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!("Failed to encode notification: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "WebSocket subscriber lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                // Pings are answered by axum; other client frames are ignored
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("WebSocket subscriber disconnected");
}
