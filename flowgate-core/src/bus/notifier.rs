use async_trait::async_trait;
use std::sync::Arc;

use super::event_bus::EventBus;
use crate::error::Result;
use crate::queue::{PositionNotifier, QueuePositionUpdate};

/// Prefix used unless [`ChannelPositionNotifier::with_channel_prefix`] says otherwise.
pub const DEFAULT_CHANNEL_PREFIX: &str = "execution:";

/// Publishes queue position updates on `<prefix><item_id>` so that whoever
/// watches the item's channel sees its place in line.
#[derive(Debug, Clone)]
pub struct ChannelPositionNotifier {
    bus: Arc<EventBus>,
    channel_prefix: String,
}

impl ChannelPositionNotifier {
    /// Notifier publishing through `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }

    /// Replace the channel prefix.
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    /// `<prefix><item_id>`.
    pub fn channel_for(&self, item_id: &str) -> String {
        format!("{}{}", self.channel_prefix, item_id)
    }
}

#[async_trait]
impl PositionNotifier for ChannelPositionNotifier {
    async fn notify_position(&self, update: &QueuePositionUpdate) -> Result<()> {
        let payload = serde_json::to_value(update)?;
        self.bus
            .publish(self.channel_for(&update.item_id), payload)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Connection, EventBusConfig};

    #[tokio::test]
    async fn update_lands_on_item_channel() {
        let bus = Arc::new(EventBus::local_only(EventBusConfig::default()));
        let (conn, mut rx) = Connection::channel(4);
        bus.connect(Arc::new(conn), ["execution:abc"]).await;

        let notifier = ChannelPositionNotifier::new(Arc::clone(&bus));
        notifier
            .notify_position(&QueuePositionUpdate::waiting("abc", 2, 5))
            .await
            .unwrap();

        let text = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "queue_position");
        assert_eq!(value["item_id"], "abc");
        assert_eq!(value["position"], 2);
        assert_eq!(value["queue_depth"], 5);
        assert_eq!(value["status"], "waiting");
    }

    #[test]
    fn custom_prefix() {
        let bus = Arc::new(EventBus::local_only(EventBusConfig::default()));
        let notifier = ChannelPositionNotifier::new(bus).with_channel_prefix("job:");
        assert_eq!(notifier.channel_for("9"), "job:9");
    }
}
