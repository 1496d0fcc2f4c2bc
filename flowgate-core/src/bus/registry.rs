use dashmap::DashMap;
use futures::future::join_all;
use std::{collections::HashSet, fmt, sync::Arc};
use tracing::debug;

use super::connection::{ConnectionId, Deliverable};

/// Per-process map of live connections and the channels they listen on.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    /// Live connections by id
    connections: Arc<DashMap<ConnectionId, Arc<dyn Deliverable>>>,
    /// Channel name to subscribed connection ids
    channels: Arc<DashMap<String, HashSet<ConnectionId>>>,
    /// Connection id to the channels it is subscribed to
    memberships: Arc<DashMap<ConnectionId, HashSet<String>>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .field("channel_count", &self.channels.len())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and subscribe it to `channels`.
    pub fn register<I, S>(&self, connection: Arc<dyn Deliverable>, channels: I) -> ConnectionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = connection.id();
        self.connections.insert(id, connection);
        self.memberships.entry(id).or_default();
        for channel in channels {
            self.subscribe(id, channel);
        }
        id
    }

    /// Add a channel to a registered connection. Returns `false` if the
    /// connection is unknown.
    pub fn subscribe(&self, id: ConnectionId, channel: impl Into<String>) -> bool {
        // The membership guard is held across the channel insert so a
        // concurrent `remove` sees, and detaches, this channel.
        let Some(mut joined) = self.memberships.get_mut(&id) else {
            return false;
        };
        let channel = channel.into();
        joined.insert(channel.clone());
        self.channels.entry(channel).or_default().insert(id);
        true
    }

    /// Drop one channel from a connection. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: ConnectionId, channel: &str) -> bool {
        let was_member = self
            .memberships
            .get_mut(&id)
            .is_some_and(|mut joined| joined.remove(channel));
        self.detach(id, channel);
        was_member
    }

    /// Remove a connection from every channel. No-op if it is already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let existed = self.connections.remove(&id).is_some();
        if let Some((_, joined)) = self.memberships.remove(&id) {
            for channel in joined {
                self.detach(id, &channel);
            }
        }
        existed
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<dyn Deliverable>> {
        self.connections.get(id).map(|c| c.clone())
    }

    /// Live connections currently subscribed to `channel`.
    pub fn subscribers(&self, channel: &str) -> Vec<Arc<dyn Deliverable>> {
        let ids: Vec<ConnectionId> = self
            .channels
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
            .collect()
    }

    /// Channels `id` is subscribed to, in no particular order.
    pub fn channels_of(&self, id: &ConnectionId) -> Vec<String> {
        self.memberships
            .get(id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connection ids on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |set| set.len())
    }

    /// Channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send `text` to every local subscriber of `channel`. Connections that
    /// are closed or fail the send are removed from all their channels.
    /// Returns how many sends succeeded.
    pub async fn deliver(&self, channel: &str, text: &str) -> usize {
        let subscribers = self.subscribers(channel);
        if subscribers.is_empty() {
            return 0;
        }

        let sends = subscribers.into_iter().map(|conn| async move {
            if conn.is_closed() {
                return Err(conn.id());
            }
            match conn.send_text(text).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    debug!(
                        target: "coord::bus",
                        connection_id = %conn.id(),
                        channel,
                        error = %err,
                        "send failed; pruning connection"
                    );
                    Err(conn.id())
                }
            }
        });

        let mut delivered = 0;
        for result in join_all(sends).await {
            match result {
                Ok(()) => delivered += 1,
                Err(dead) => {
                    self.remove(dead);
                }
            }
        }
        delivered
    }

    fn detach(&self, id: ConnectionId, channel: &str) {
        if let Some(mut members) = self.channels.get_mut(channel) {
            members.remove(&id);
        }
        self.channels.remove_if(channel, |_, members| members.is_empty());
    }
}
