use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

use crate::error::Result;

/// Storage port for an ordered admission queue.
///
/// Scores are enqueue times in microseconds since the Unix epoch. Entries are
/// ordered by score, then lexically by item id, which is the order a sorted
/// set gives members with equal scores.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Add `item_id` unless it is already queued. Returns whether it was added.
    async fn insert(&self, queue: &str, item_id: &str, score: i64) -> Result<bool>;

    /// Zero-based rank of `item_id`.
    async fn rank(&self, queue: &str, item_id: &str) -> Result<Option<u64>>;

    /// Returns whether the item was queued.
    async fn remove(&self, queue: &str, item_id: &str) -> Result<bool>;

    /// Number of entries.
    async fn len(&self, queue: &str) -> Result<u64>;

    /// Every entry in rank order with its score.
    async fn entries(&self, queue: &str) -> Result<Vec<(String, i64)>>;

    /// Remove every entry scored strictly below `cutoff`.
    async fn remove_scored_below(&self, queue: &str, cutoff: i64) -> Result<u64>;
}

/// Process-local queue store for tests and single-instance runs.
#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl fmt::Debug for InMemoryQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryQueueStore")
            .field("queues", &self.queues.lock().len())
            .finish()
    }
}

impl InMemoryQueueStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered(entries: &HashMap<String, i64>) -> Vec<(String, i64)> {
        let mut ordered: Vec<(String, i64)> = entries
            .iter()
            .map(|(id, score)| (id.clone(), *score))
            .collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ordered
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, queue: &str, item_id: &str, score: i64) -> Result<bool> {
        let mut queues = self.queues.lock();
        let entries = queues.entry(queue.to_string()).or_default();
        if entries.contains_key(item_id) {
            return Ok(false);
        }
        entries.insert(item_id.to_string(), score);
        Ok(true)
    }

    async fn rank(&self, queue: &str, item_id: &str) -> Result<Option<u64>> {
        let queues = self.queues.lock();
        let Some(entries) = queues.get(queue) else {
            return Ok(None);
        };
        Ok(Self::ordered(entries)
            .iter()
            .position(|(id, _)| id == item_id)
            .map(|rank| rank as u64))
    }

    async fn remove(&self, queue: &str, item_id: &str) -> Result<bool> {
        let mut queues = self.queues.lock();
        Ok(queues
            .get_mut(queue)
            .and_then(|entries| entries.remove(item_id))
            .is_some())
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let queues = self.queues.lock();
        Ok(queues.get(queue).map_or(0, |entries| entries.len() as u64))
    }

    async fn entries(&self, queue: &str) -> Result<Vec<(String, i64)>> {
        let queues = self.queues.lock();
        Ok(queues.get(queue).map(Self::ordered).unwrap_or_default())
    }

    async fn remove_scored_below(&self, queue: &str, cutoff: i64) -> Result<u64> {
        let mut queues = self.queues.lock();
        let Some(entries) = queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|_, score| *score >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
