use async_trait::async_trait;
use firewood_types::{ContentType, Notification};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::NotificationError;

/// Fire-and-forget message queue towards users' contact channels
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Enqueue a message and return its id
    async fn notify(&self, notification: Notification) -> Result<String, NotificationError>;
}

/// Notifier that keeps every queued message in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<RwLock<Vec<(String, Notification)>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.read().await.clone()
    }

    pub async fn count(&self, content_type: ContentType) -> usize {
        self.sent
            .read()
            .await
            .iter()
            .filter(|(_, n)| n.content_type == content_type)
            .count()
    }

    pub async fn sent_to(&self, recipient: &str) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|(_, n)| n.recipient == recipient)
            .map(|(_, n)| n.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<String, NotificationError> {
        if notification.recipient.is_empty() {
            return Err(NotificationError::MissingRecipient);
        }
        let id = format!("notification-{}", Uuid::new_v4());
        debug!(
            notification_id = %id,
            recipient = %notification.recipient,
            content_type = ?notification.content_type,
            "Notification queued"
        );
        self.sent.write().await.push((id.clone(), notification));
        Ok(id)
    }
}
