//! Best-effort change notifications for real-time subscribers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::change_entry::ChangeEntry;
use crate::types::ChangeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub change_id: ChangeId,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<&ChangeEntry> for ChangeEvent {
    fn from(entry: &ChangeEntry) -> Self {
        Self {
            change_id: entry.id,
            entity_type: entry.entity_type.clone(),
            entity_id: entry.entity_id.clone(),
            operation: entry.operation.clone(),
            actor: entry.actor.clone(),
            occurred_at: entry.created_at,
        }
    }
}

/// Sink for change notifications. Delivery is best-effort: a failed publish is
/// logged and never surfaces to the code that recorded the change.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn publish(&self, event: ChangeEvent) -> anyhow::Result<()>;
}

/// In-process feed backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl BroadcastChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ChangeFeed for BroadcastChangeFeed {
    async fn publish(&self, event: ChangeEvent) -> anyhow::Result<()> {
        // No subscribers is a normal state, not a delivery failure.
        if self.sender.send(event).is_err() {
            tracing::debug!("change feed has no subscribers");
        }
        Ok(())
    }
}

/// Publishes `event` on a detached task so the caller never waits on the feed.
pub fn notify(feed: &Arc<dyn ChangeFeed>, event: ChangeEvent) {
    let feed = Arc::clone(feed);
    tokio::spawn(async move {
        let change_id = event.change_id;
        if let Err(err) = feed.publish(event).await {
            tracing::warn!(%change_id, error = %err, "change feed publish failed");
        }
    });
}
