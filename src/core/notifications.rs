//! Notification hub for catalog changes
//!
//! Writes to the catalog publish a `Notification` that is:
//! - kept in a bounded history, queryable by topic
//! - fanned out to live subscribers (WebSocket clients) over a broadcast channel
//! - optionally mirrored to other instances through Redis pub/sub

use crate::core::error::{ApiError, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const BOOK_CREATED: &str = "book.created";
pub const BOOK_UPDATED: &str = "book.updated";
pub const BOOK_DELETED: &str = "book.deleted";
pub const AUTHOR_CREATED: &str = "author.created";
pub const AUTHOR_UPDATED: &str = "author.updated";
pub const AUTHOR_DELETED: &str = "author.deleted";
pub const CATEGORY_CREATED: &str = "category.created";
pub const CATEGORY_UPDATED: &str = "category.updated";
pub const CATEGORY_DELETED: &str = "category.deleted";
pub const IMAGE_UPLOADED: &str = "book.image_uploaded";
pub const READER_REGISTERED: &str = "reader.registered";

/// A single catalog change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub topic: String,
    pub entity_id: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(topic: impl Into<String>, entity_id: Option<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            entity_id,
            data,
            timestamp: Utc::now(),
        }
    }

    /// `"book.*"` matches every book topic, anything else must match exactly
    pub fn matches(&self, pattern: &str) -> bool {
        match pattern.strip_suffix(".*") {
            Some(prefix) => self
                .topic
                .strip_prefix(prefix)
                .map_or(false, |rest| rest.starts_with('.')),
            None => self.topic == pattern,
        }
    }
}

/// Envelope used on the Redis channel
#[derive(Debug, Serialize, Deserialize)]
struct RemoteNotification {
    origin: String,
    notification: Notification,
}

/// In-process pub/sub hub
pub struct NotificationHub {
    sender: broadcast::Sender<Notification>,
    history: Arc<RwLock<VecDeque<Notification>>>,
    max_history: usize,
    instance_id: String,
    remote: RwLock<Option<RedisBridge>>,
}

impl NotificationHub {
    pub fn new(max_history: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(max_history))),
            max_history,
            instance_id: Uuid::new_v4().to_string(),
            remote: RwLock::new(None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Receive every notification published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish locally and, when a bridge is attached, to other instances
    pub async fn publish(&self, notification: Notification) {
        self.deliver(notification.clone()).await;

        let remote = self.remote.read().await;
        if let Some(bridge) = remote.as_ref() {
            if let Err(e) = bridge.forward(&self.instance_id, &notification).await {
                warn!(topic = %notification.topic, "Failed to mirror notification to Redis: {}", e);
            }
        }
    }

    /// Convenience wrapper building the notification in place
    pub async fn notify(&self, topic: &str, entity_id: &str, data: Value) {
        self.publish(Notification::new(topic, Some(entity_id.to_string()), data))
            .await;
    }

    async fn deliver(&self, notification: Notification) {
        {
            let mut history = self.history.write().await;
            history.push_back(notification.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // No receivers is not an error: nobody is listening right now
        if self.sender.send(notification).is_err() {
            debug!("Notification published without live subscribers");
        }
    }

    /// Most recent notifications first, optionally restricted to a topic pattern
    pub async fn history(&self, topic: Option<&str>, limit: usize) -> Vec<Notification> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .filter(|n| topic.map_or(true, |pattern| n.matches(pattern)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Attach a Redis bridge and start forwarding messages from other instances
    pub async fn attach_redis(self: &Arc<Self>, bridge: RedisBridge) -> Result<()> {
        let mut pubsub = bridge
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| ApiError::NotificationError(format!("Redis subscribe failed: {}", e)))?;
        pubsub
            .subscribe(&bridge.channel)
            .await
            .map_err(|e| ApiError::NotificationError(format!("Redis subscribe failed: {}", e)))?;

        info!(channel = %bridge.channel, "Notification bridge subscribed to Redis");
        *self.remote.write().await = Some(bridge);

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Ignoring unreadable Redis message: {}", e);
                        continue;
                    }
                };
                hub.receive_remote(&payload).await;
            }
            warn!("Redis notification stream closed");
        });

        Ok(())
    }

    /// Deliver a message from the Redis channel unless this instance sent it
    async fn receive_remote(&self, payload: &str) -> bool {
        match serde_json::from_str::<RemoteNotification>(payload) {
            Ok(remote) if remote.origin == self.instance_id => false,
            Ok(remote) => {
                self.deliver(remote.notification).await;
                true
            }
            Err(e) => {
                warn!("Ignoring malformed notification from Redis: {}", e);
                false
            }
        }
    }
}

/// Redis side of the hub: publishes on one channel shared by all instances
pub struct RedisBridge {
    client: redis::Client,
    connection: redis::aio::ConnectionManager,
    channel: String,
}

impl RedisBridge {
    pub async fn connect(client: redis::Client, channel: impl Into<String>) -> Result<Self> {
        let connection = client.get_connection_manager().await?;
        Ok(Self {
            client,
            connection,
            channel: channel.into(),
        })
    }

    async fn forward(&self, origin: &str, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_string(&RemoteNotification {
            origin: origin.to_string(),
            notification: notification.clone(),
        })?;
        let mut connection = self.connection.clone();
        connection
            .publish::<_, _, ()>(&self.channel, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = NotificationHub::new(10, 16);
        let mut rx = hub.subscribe();

        hub.notify(BOOK_CREATED, "b1", json!({ "title": "Dune" })).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, BOOK_CREATED);
        assert_eq!(received.entity_id.as_deref(), Some("b1"));
        assert_eq!(received.data["title"], "Dune");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let hub = NotificationHub::new(10, 16);
        assert_eq!(hub.subscriber_count(), 0);
        hub.notify(AUTHOR_DELETED, "a1", json!({})).await;
        assert_eq!(hub.history(None, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_newest_first() {
        let hub = NotificationHub::new(3, 16);
        for i in 0..5 {
            hub.notify(BOOK_UPDATED, &format!("b{}", i), json!({ "index": i })).await;
        }

        let history = hub.history(None, 10).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].data["index"], 4);
        assert_eq!(history[2].data["index"], 2);
    }

    #[tokio::test]
    async fn test_history_topic_filter() {
        let hub = NotificationHub::new(10, 16);
        hub.notify(BOOK_CREATED, "b1", json!({})).await;
        hub.notify(CATEGORY_CREATED, "c1", json!({})).await;
        hub.notify(BOOK_DELETED, "b1", json!({})).await;

        assert_eq!(hub.history(Some("book.*"), 10).await.len(), 2);
        assert_eq!(hub.history(Some(CATEGORY_CREATED), 10).await.len(), 1);
        assert_eq!(hub.history(Some("book.*"), 1).await[0].topic, BOOK_DELETED);
    }

    #[test]
    fn test_topic_pattern() {
        let n = Notification::new(BOOK_CREATED, None, json!({}));
        assert!(n.matches("book.*"));
        assert!(n.matches(BOOK_CREATED));
        assert!(!n.matches("books.*"));
        assert!(!n.matches("author.*"));
    }

    #[tokio::test]
    async fn test_remote_messages_from_self_are_ignored() {
        let hub = NotificationHub::new(10, 16);

        let own = serde_json::to_string(&RemoteNotification {
            origin: hub.instance_id().to_string(),
            notification: Notification::new(BOOK_CREATED, None, json!({})),
        })
        .unwrap();
        assert!(!hub.receive_remote(&own).await);

        let foreign = serde_json::to_string(&RemoteNotification {
            origin: "other-instance".to_string(),
            notification: Notification::new(BOOK_UPDATED, None, json!({})),
        })
        .unwrap();
        assert!(hub.receive_remote(&foreign).await);
        assert!(!hub.receive_remote("not json").await);

        let history = hub.history(None, 10).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].topic, BOOK_UPDATED);
    }
}
