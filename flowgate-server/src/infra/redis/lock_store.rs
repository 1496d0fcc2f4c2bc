use async_trait::async_trait;
use flowgate_core::{
    CoordinationError, Result,
    mutex::{Lock, LockStore},
};
use redis::aio::ConnectionManager;
use std::{fmt, time::Duration};

use super::store_error;

/// Lua scripts for the ownership-checked mutations. Each runs as one atomic
/// step on the server.
mod scripts {
    use redis::Script;

    /// KEYS[1] lock key, ARGV[1] owner id, ARGV[2] new record, ARGV[3] ttl ms
    pub fn replace_if_owned() -> Script {
        Script::new(
            r#"
            local current = redis.call('GET', KEYS[1])
            if not current then
                return 0
            end
            local ok, record = pcall(cjson.decode, current)
            if not ok or record['owner_id'] ~= ARGV[1] then
                return 0
            end
            redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
            return 1
            "#,
        )
    }

    /// KEYS[1] lock key, ARGV[1] owner id
    pub fn remove_if_owned() -> Script {
        Script::new(
            r#"
            local current = redis.call('GET', KEYS[1])
            if not current then
                return 0
            end
            local ok, record = pcall(cjson.decode, current)
            if not ok or record['owner_id'] ~= ARGV[1] then
                return 0
            end
            return redis.call('DEL', KEYS[1])
            "#,
        )
    }
}

/// Lock records stored as JSON strings under `<key_prefix><lock_name>`.
#[derive(Clone)]
pub struct RedisLockStore {
    redis: ConnectionManager,
    key_prefix: String,
}

impl fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLockStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisLockStore {
    pub fn new(redis: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            redis,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, lock_name: &str) -> String {
        format!("{}{}", self.key_prefix, lock_name)
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    let millis = u64::try_from(ttl.as_millis()).map_err(|_| {
        CoordinationError::InvalidArgument(format!("lock ttl {ttl:?} is out of range"))
    })?;
    // PX 0 is rejected by Redis
    Ok(millis.max(1))
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn insert_if_absent(&self, lock: &Lock, ttl: Duration) -> Result<bool> {
        let ttl_ms = ttl_millis(ttl)?;
        let record = serde_json::to_string(lock)?;
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(&lock.lock_name))
            .arg(record)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn load(&self, lock_name: &str) -> Result<Option<Lock>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(lock_name))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn replace_if_owned(&self, lock: &Lock, ttl: Duration) -> Result<bool> {
        let ttl_ms = ttl_millis(ttl)?;
        let record = serde_json::to_string(lock)?;
        let mut conn = self.redis.clone();
        let replaced: i64 = scripts::replace_if_owned()
            .key(self.key(&lock.lock_name))
            .arg(&lock.owner_id)
            .arg(record)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(replaced == 1)
    }

    async fn remove_if_owned(&self, lock_name: &str, owner_id: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = scripts::remove_if_owned()
            .key(self.key(lock_name))
            .arg(owner_id)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed == 1)
    }

    async fn remove(&self, lock_name: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.key(lock_name))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }
}
