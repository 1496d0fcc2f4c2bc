//! Shared FIFO admission queue.
//!
//! Work items wait in one ordered collection scored by enqueue time. Positions
//! handed to callers are 1-based. Whenever the shape of the queue changes the
//! queue re-announces every item's position through a [`PositionNotifier`],
//! which keeps this module free of any knowledge about how updates reach
//! clients.

mod store;

pub use store::{InMemoryQueueStore, QueueStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoordinationError, Result};

/// Default sorted-set key for the execution queue.
pub const DEFAULT_QUEUE_KEY: &str = "execution:queue";

/// One queued item as seen from outside.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub item_id: String,
    /// 1-based; the head of the line is 1
    pub position: u64,
    /// Wall-clock time the item first joined, which is also its sort key
    pub enqueued_at: DateTime<Utc>,
}

/// Message announced for each waiting item.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuePositionUpdate {
    /// Always `queue_position`
    #[serde(rename = "type")]
    pub kind: String,
    pub item_id: String,
    /// 1-based place in line
    pub position: u64,
    /// Items queued when the update was built
    pub queue_depth: u64,
    /// Always `waiting`
    pub status: String,
}

impl QueuePositionUpdate {
    /// Update for an item still waiting at `position` of `queue_depth`.
    pub fn waiting(item_id: impl Into<String>, position: u64, queue_depth: u64) -> Self {
        Self {
            kind: "queue_position".to_string(),
            item_id: item_id.into(),
            position,
            queue_depth,
            status: "waiting".to_string(),
        }
    }
}

/// Where position updates go.
#[async_trait]
pub trait PositionNotifier: Send + Sync {
    /// Deliver one update. Errors are logged by the queue, never retried.
    async fn notify_position(&self, update: &QueuePositionUpdate) -> Result<()>;
}

/// Notifier that drops every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl PositionNotifier for NoopNotifier {
    async fn notify_position(&self, _update: &QueuePositionUpdate) -> Result<()> {
        Ok(())
    }
}

/// Counts from one [`AdmissionQueue::broadcast_positions`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    /// Updates handed to the notifier successfully
    pub notified: usize,
    /// Updates the notifier rejected
    pub failed: usize,
}

/// FIFO admission queue over a [`QueueStore`], ordered by enqueue time.
///
/// Every change that moves the line re-announces each waiting item's
/// position through the [`PositionNotifier`].
#[derive(Clone)]
pub struct AdmissionQueue {
    store: Arc<dyn QueueStore>,
    notifier: Arc<dyn PositionNotifier>,
    clock: Arc<dyn Clock>,
    key: String,
}

impl fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl AdmissionQueue {
    /// Queue stored under [`DEFAULT_QUEUE_KEY`].
    pub fn new(store: Arc<dyn QueueStore>, notifier: Arc<dyn PositionNotifier>) -> Self {
        Self {
            store,
            notifier,
            clock: Arc::new(SystemClock),
            key: DEFAULT_QUEUE_KEY.to_string(),
        }
    }

    /// Store the queue under `key` instead.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Score entries with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sorted-set key in use.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Queue `item_id` at the tail and return its 1-based position.
    ///
    /// Enqueueing an item that is already waiting keeps its original place.
    pub async fn enqueue(&self, item_id: &str) -> Result<u64> {
        if item_id.is_empty() {
            return Err(CoordinationError::InvalidArgument(
                "queue item id must not be empty".into(),
            ));
        }

        let score = self.clock.now().timestamp_micros();
        let inserted = self.store.insert(&self.key, item_id, score).await?;
        let position = self
            .store
            .rank(&self.key, item_id)
            .await?
            .map(|rank| rank + 1)
            .ok_or_else(|| {
                CoordinationError::Internal(format!(
                    "item {item_id} left queue {} before its position was read",
                    self.key
                ))
            })?;

        if inserted {
            info!(target: "coord::queue", queue = %self.key, item_id, position, "item enqueued");
            self.announce().await;
        } else {
            debug!(target: "coord::queue", queue = %self.key, item_id, position, "item already queued");
        }
        Ok(position)
    }

    /// Remove `item_id`; returns whether it was queued.
    pub async fn dequeue(&self, item_id: &str) -> Result<bool> {
        let removed = self.store.remove(&self.key, item_id).await?;
        if removed {
            info!(target: "coord::queue", queue = %self.key, item_id, "item dequeued");
            self.announce().await;
        }
        Ok(removed)
    }

    /// 1-based position, or `None` if not queued.
    pub async fn position(&self, item_id: &str) -> Result<Option<u64>> {
        Ok(self
            .store
            .rank(&self.key, item_id)
            .await?
            .map(|rank| rank + 1))
    }

    /// Number of queued items.
    pub async fn depth(&self) -> Result<u64> {
        self.store.len(&self.key).await
    }

    /// Snapshot of every queued item in order, with enqueue times.
    pub async fn entries(&self) -> Result<Vec<QueueEntry>> {
        let entries = self.store.entries(&self.key).await?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(rank, (item_id, score))| QueueEntry {
                item_id,
                position: rank as u64 + 1,
                enqueued_at: DateTime::from_timestamp_micros(score).unwrap_or_default(),
            })
            .collect())
    }

    /// `(item_id, position)` for every queued item, head first.
    pub async fn all_positions(&self) -> Result<Vec<(String, u64)>> {
        let entries = self.store.entries(&self.key).await?;
        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(rank, (item_id, _))| (item_id, rank as u64 + 1))
            .collect())
    }

    /// Re-announce every queued item's position. A failed notification is
    /// logged and skipped so the remaining items still hear about it.
    pub async fn broadcast_positions(&self) -> Result<BroadcastSummary> {
        let positions = self.all_positions().await?;
        let depth = positions.len() as u64;
        let mut summary = BroadcastSummary::default();

        for (item_id, position) in positions {
            let update = QueuePositionUpdate::waiting(item_id, position, depth);
            match self.notifier.notify_position(&update).await {
                Ok(()) => summary.notified += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        target: "coord::queue",
                        queue = %self.key,
                        item_id = %update.item_id,
                        error = %err,
                        "failed to announce queue position"
                    );
                }
            }
        }

        debug!(
            target: "coord::queue",
            queue = %self.key,
            notified = summary.notified,
            failed = summary.failed,
            "queue positions announced"
        );
        Ok(summary)
    }

    /// Drop entries older than `max_age`. Meant to be driven by a periodic
    /// maintenance task so items whose producer died do not wait forever.
    pub async fn cleanup_stale(&self, max_age: Duration) -> Result<u64> {
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .ok_or_else(|| {
                CoordinationError::InvalidArgument(format!("max age {max_age:?} is out of range"))
            })?
            .timestamp_micros();

        let removed = self.store.remove_scored_below(&self.key, cutoff).await?;
        if removed > 0 {
            warn!(target: "coord::queue", queue = %self.key, removed, "purged stale queue entries");
            self.announce().await;
        }
        Ok(removed)
    }

    /// Broadcast after a mutation. The mutation already happened, so a
    /// failure here is only logged.
    async fn announce(&self) {
        if let Err(err) = self.broadcast_positions().await {
            warn!(
                target: "coord::queue",
                queue = %self.key,
                error = %err,
                "queue changed but positions could not be read for broadcast"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        updates: Mutex<Vec<QueuePositionUpdate>>,
        fail_for: Option<String>,
    }

    impl RecordingNotifier {
        fn failing_for(item_id: &str) -> Self {
            Self {
                updates: Mutex::new(Vec::new()),
                fail_for: Some(item_id.to_string()),
            }
        }

        fn take(&self) -> Vec<QueuePositionUpdate> {
            std::mem::take(&mut *self.updates.lock())
        }
    }

    #[async_trait]
    impl PositionNotifier for RecordingNotifier {
        async fn notify_position(&self, update: &QueuePositionUpdate) -> Result<()> {
            if self.fail_for.as_deref() == Some(update.item_id.as_str()) {
                return Err(CoordinationError::StoreUnavailable("channel gone".into()));
            }
            self.updates.lock().push(update.clone());
            Ok(())
        }
    }

    fn queue_with(
        notifier: Arc<RecordingNotifier>,
    ) -> (AdmissionQueue, ManualClock) {
        let clock = ManualClock::default();
        let queue = AdmissionQueue::new(Arc::new(InMemoryQueueStore::new()), notifier)
            .with_clock(Arc::new(clock.clone()));
        (queue, clock)
    }

    #[tokio::test]
    async fn fifo_positions_shift_after_dequeue() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, clock) = queue_with(notifier.clone());

        for id in ["A", "B", "C"] {
            queue.enqueue(id).await.unwrap();
            clock.advance(chrono::Duration::milliseconds(1));
        }
        assert_eq!(queue.position("A").await.unwrap(), Some(1));
        assert_eq!(queue.position("B").await.unwrap(), Some(2));
        assert_eq!(queue.position("C").await.unwrap(), Some(3));

        notifier.take();
        assert!(queue.dequeue("B").await.unwrap());
        assert_eq!(queue.position("A").await.unwrap(), Some(1));
        assert_eq!(queue.position("C").await.unwrap(), Some(2));
        assert_eq!(queue.position("B").await.unwrap(), None);

        let updates = notifier.take();
        assert_eq!(
            updates
                .iter()
                .map(|u| (u.item_id.as_str(), u.position, u.queue_depth))
                .collect::<Vec<_>>(),
            vec![("A", 1, 2), ("C", 2, 2)]
        );
    }

    #[tokio::test]
    async fn enqueue_announces_every_position() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, clock) = queue_with(notifier.clone());

        queue.enqueue("A").await.unwrap();
        clock.advance(chrono::Duration::milliseconds(1));
        assert_eq!(queue.enqueue("B").await.unwrap(), 2);

        let updates = notifier.take();
        let last_round: Vec<_> = updates[updates.len() - 2..]
            .iter()
            .map(|u| (u.item_id.clone(), u.position, u.status.clone()))
            .collect();
        assert_eq!(
            last_round,
            vec![
                ("A".to_string(), 1, "waiting".to_string()),
                ("B".to_string(), 2, "waiting".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn reenqueue_keeps_original_place() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, clock) = queue_with(notifier.clone());

        queue.enqueue("A").await.unwrap();
        clock.advance(chrono::Duration::milliseconds(1));
        queue.enqueue("B").await.unwrap();
        clock.advance(chrono::Duration::milliseconds(1));
        notifier.take();

        assert_eq!(queue.enqueue("A").await.unwrap(), 1);
        assert_eq!(queue.depth().await.unwrap(), 2);
        assert!(notifier.take().is_empty());
    }

    #[tokio::test]
    async fn dequeue_of_missing_item_is_quiet() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, _) = queue_with(notifier.clone());

        assert!(!queue.dequeue("ghost").await.unwrap());
        assert!(notifier.take().is_empty());
    }

    #[tokio::test]
    async fn equal_timestamps_order_by_item_id() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, _) = queue_with(notifier);

        for id in ["c", "a", "b"] {
            queue.enqueue(id).await.unwrap();
        }
        assert_eq!(
            queue.all_positions().await.unwrap(),
            vec![("a".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3)]
        );
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_entries() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, clock) = queue_with(notifier.clone());

        queue.enqueue("old-1").await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        queue.enqueue("old-2").await.unwrap();
        clock.advance(chrono::Duration::seconds(50));
        queue.enqueue("fresh-1").await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        queue.enqueue("fresh-2").await.unwrap();
        clock.advance(chrono::Duration::seconds(5));
        notifier.take();

        // old-1 is 70s old, old-2 60s, fresh-1 10s, fresh-2 5s.
        let removed = queue.cleanup_stale(Duration::from_secs(30)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            queue.all_positions().await.unwrap(),
            vec![("fresh-1".to_string(), 1), ("fresh-2".to_string(), 2)]
        );
        assert_eq!(notifier.take().len(), 2);

        assert_eq!(queue.cleanup_stale(Duration::from_secs(30)).await.unwrap(), 0);
        assert!(notifier.take().is_empty());
    }

    #[tokio::test]
    async fn oversized_max_age_is_rejected() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, _) = queue_with(notifier);
        queue.enqueue("A").await.unwrap();

        let err = queue
            .cleanup_stale(Duration::from_secs(10_000_000_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidArgument(_)));
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_notification_does_not_stop_the_rest() {
        let notifier = Arc::new(RecordingNotifier::failing_for("B"));
        let (queue, clock) = queue_with(notifier.clone());

        for id in ["A", "B", "C"] {
            queue.enqueue(id).await.unwrap();
            clock.advance(chrono::Duration::milliseconds(1));
        }
        notifier.take();

        let summary = queue.broadcast_positions().await.unwrap();
        assert_eq!(summary, BroadcastSummary { notified: 2, failed: 1 });
        let delivered: Vec<_> = notifier.take().into_iter().map(|u| u.item_id).collect();
        assert_eq!(delivered, vec!["A".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn positions_are_consistent_with_depth() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, clock) = queue_with(notifier);

        for i in 0..7 {
            queue.enqueue(&format!("item-{i}")).await.unwrap();
            clock.advance(chrono::Duration::milliseconds(3));
        }
        queue.dequeue("item-3").await.unwrap();
        queue.dequeue("item-0").await.unwrap();

        let positions = queue.all_positions().await.unwrap();
        assert_eq!(positions.len() as u64, queue.depth().await.unwrap());
        for (index, (_, position)) in positions.iter().enumerate() {
            assert_eq!(*position, index as u64 + 1);
        }

        let entries = queue.entries().await.unwrap();
        assert!(entries.windows(2).all(|w| w[0].enqueued_at <= w[1].enqueued_at));
    }

    #[tokio::test]
    async fn empty_item_id_is_rejected() {
        let (queue, _) = queue_with(Arc::new(RecordingNotifier::default()));
        assert!(matches!(
            queue.enqueue("").await,
            Err(CoordinationError::InvalidArgument(_))
        ));
    }
}
