use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use super::Lock;
use crate::error::Result;

/// Storage port for lock records.
///
/// Every method must be a single atomic step on the backing store. The
/// ownership-checked variants compare `owner_id` and mutate in the same step so
/// a lease that expired and was re-acquired by someone else is never touched.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Write `lock` only if no record exists under its name; the record
    /// expires after `ttl`. Returns whether the write happened.
    async fn insert_if_absent(&self, lock: &Lock, ttl: Duration) -> Result<bool>;

    /// The live record, if any.
    async fn load(&self, lock_name: &str) -> Result<Option<Lock>>;

    /// Overwrite the record and reset its expiry, if it is still owned by
    /// `lock.owner_id`.
    async fn replace_if_owned(&self, lock: &Lock, ttl: Duration) -> Result<bool>;

    /// Delete the record only if `owner_id` still holds it.
    async fn remove_if_owned(&self, lock_name: &str, owner_id: &str) -> Result<bool>;

    /// Unconditional delete.
    async fn remove(&self, lock_name: &str) -> Result<bool>;
}

/// Process-local lock store. Expiry follows tokio's clock, so tests can pause
/// and advance time to watch leases lapse.
#[derive(Default)]
pub struct InMemoryLockStore {
    records: Mutex<HashMap<String, (Lock, Instant)>>,
}

impl fmt::Debug for InMemoryLockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLockStore")
            .field("records", &self.records.lock().len())
            .finish()
    }
}

impl InMemoryLockStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a record as if its TTL had elapsed in the store.
    pub fn expire(&self, lock_name: &str) {
        self.records.lock().remove(lock_name);
    }

    fn live<'a>(
        records: &'a mut HashMap<String, (Lock, Instant)>,
        lock_name: &str,
    ) -> Option<&'a mut (Lock, Instant)> {
        let now = Instant::now();
        if records
            .get(lock_name)
            .is_some_and(|(_, deadline)| *deadline <= now)
        {
            records.remove(lock_name);
        }
        records.get_mut(lock_name)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn insert_if_absent(&self, lock: &Lock, ttl: Duration) -> Result<bool> {
        let mut records = self.records.lock();
        if Self::live(&mut records, &lock.lock_name).is_some() {
            return Ok(false);
        }
        records.insert(lock.lock_name.clone(), (lock.clone(), Instant::now() + ttl));
        Ok(true)
    }

    async fn load(&self, lock_name: &str) -> Result<Option<Lock>> {
        let mut records = self.records.lock();
        Ok(Self::live(&mut records, lock_name).map(|(lock, _)| lock.clone()))
    }

    async fn replace_if_owned(&self, lock: &Lock, ttl: Duration) -> Result<bool> {
        let mut records = self.records.lock();
        match Self::live(&mut records, &lock.lock_name) {
            Some(entry) if entry.0.owner_id == lock.owner_id => {
                *entry = (lock.clone(), Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_if_owned(&self, lock_name: &str, owner_id: &str) -> Result<bool> {
        let mut records = self.records.lock();
        let owned = Self::live(&mut records, lock_name)
            .is_some_and(|(lock, _)| lock.owner_id == owner_id);
        if owned {
            records.remove(lock_name);
        }
        Ok(owned)
    }

    async fn remove(&self, lock_name: &str) -> Result<bool> {
        let mut records = self.records.lock();
        let present = Self::live(&mut records, lock_name).is_some();
        records.remove(lock_name);
        Ok(present)
    }
}
