use async_trait::async_trait;
use flowgate_core::{Result, queue::QueueStore};
use redis::aio::ConnectionManager;
use std::fmt;

use super::store_error;

/// Sorted-set backed queue. Members are item ids, scores are enqueue times in
/// epoch microseconds, which Redis keeps exactly in its double scores.
#[derive(Clone)]
pub struct RedisQueueStore {
    redis: ConnectionManager,
}

impl fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueStore").finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn insert(&self, queue: &str, item_id: &str, score: i64) -> Result<bool> {
        let mut conn = self.redis.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(queue)
            .arg("NX")
            .arg(score)
            .arg(item_id)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(added == 1)
    }

    async fn rank(&self, queue: &str, item_id: &str) -> Result<Option<u64>> {
        let mut conn = self.redis.clone();
        redis::cmd("ZRANK")
            .arg(queue)
            .arg(item_id)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn remove(&self, queue: &str, item_id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = redis::cmd("ZREM")
            .arg(queue)
            .arg(item_id)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed == 1)
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        redis::cmd("ZCARD")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn entries(&self, queue: &str) -> Result<Vec<(String, i64)>> {
        let mut conn = self.redis.clone();
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(queue)
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(entries
            .into_iter()
            .map(|(item_id, score)| (item_id, score as i64))
            .collect())
    }

    async fn remove_scored_below(&self, queue: &str, cutoff: i64) -> Result<u64> {
        let mut conn = self.redis.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(queue)
            .arg("-inf")
            .arg(format!("({cutoff}"))
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }
}
