//! Named, owner-tagged leases.
//!
//! A lock is a single record in the shared store; its presence *is* the lock.
//! Acquisition never blocks: a caller that loses gets the current holder back
//! so it can tell its user who is busy and with what. Records carry a TTL so a
//! crashed owner cannot wedge the name forever, but the TTL is a safety net
//! and well-behaved owners always [`MutexService::release`].

mod store;

pub use store::{InMemoryLockStore, LockStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoordinationError, Result};

/// Default lease length when callers do not pick one.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// A held lease as stored under its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// Key the lease is stored under
    pub lock_name: String,
    /// Opaque caller id; only this owner may release or extend
    pub owner_id: String,
    /// Human readable owner, shown to users who are refused the lock
    pub owner_display: String,
    /// Free-text description of what the owner is doing
    pub operation: String,
    /// When the current owner first took the lock; unchanged by `extend`
    pub acquired_at: DateTime<Utc>,
    /// Wall-clock end of the lease; the store drops the record at this point
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    /// Time left on the lease as of `now`, zero once it has lapsed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether `owner_id` is the holder.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// Outcome of [`MutexService::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// The caller now holds the lease described here.
    Granted(Lock),
    /// Someone else holds it. `None` only when the holder's lease lapsed
    /// between the refused write and the follow-up read.
    Busy(Option<Lock>),
}

impl LockAcquisition {
    /// True for [`LockAcquisition::Granted`].
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// Current holder when the acquisition was refused.
    pub fn holder(&self) -> Option<&Lock> {
        match self {
            Self::Granted(_) => None,
            Self::Busy(holder) => holder.as_ref(),
        }
    }
}

/// Everything a caller states about itself when asking for a lock. Fields
/// mean the same as on [`Lock`].
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    pub lock_name: &'a str,
    pub owner_id: &'a str,
    pub owner_display: &'a str,
    pub operation: &'a str,
}

/// Named, owner-tagged leases over a [`LockStore`].
///
/// Acquisition never blocks: a refused caller gets the current holder back
/// and decides for itself whether to retry.
#[derive(Clone)]
pub struct MutexService {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl fmt::Debug for MutexService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexService")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl MutexService {
    /// Service using the system clock and [`DEFAULT_LOCK_TTL`].
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            default_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Stamp `acquired_at` and `expires_at` from `clock` instead.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lease length used by [`acquire_default`](Self::acquire_default).
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// See [`with_default_ttl`](Self::with_default_ttl).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Try to take `request.lock_name` for `ttl`. Never waits.
    pub async fn acquire(
        &self,
        request: LockRequest<'_>,
        ttl: Duration,
    ) -> Result<LockAcquisition> {
        validate_ttl(ttl)?;

        let lock = self.new_record(&request, ttl)?;
        if self.store.insert_if_absent(&lock, ttl).await? {
            info!(
                target: "coord::mutex",
                lock = %lock.lock_name,
                owner = %lock.owner_id,
                operation = %lock.operation,
                ttl_secs = ttl.as_secs(),
                "lock acquired"
            );
            return Ok(LockAcquisition::Granted(lock));
        }

        let holder = self.store.load(request.lock_name).await?;
        if holder.is_none() {
            // The previous lease lapsed between our write and the read; the
            // name is free now, so give the write one more go.
            let lock = self.new_record(&request, ttl)?;
            if self.store.insert_if_absent(&lock, ttl).await? {
                info!(
                    target: "coord::mutex",
                    lock = %lock.lock_name,
                    owner = %lock.owner_id,
                    "lock acquired after holder expired"
                );
                return Ok(LockAcquisition::Granted(lock));
            }
            let holder = self.store.load(request.lock_name).await?;
            return Ok(LockAcquisition::Busy(holder));
        }

        debug!(
            target: "coord::mutex",
            lock = %request.lock_name,
            requester = %request.owner_id,
            holder = ?holder.as_ref().map(|h| h.owner_id.as_str()),
            "lock busy"
        );
        Ok(LockAcquisition::Busy(holder))
    }

    /// [`acquire`](Self::acquire) with the configured default lease length.
    pub async fn acquire_default(
        &self,
        request: LockRequest<'_>,
    ) -> Result<LockAcquisition> {
        self.acquire(request, self.default_ttl).await
    }

    /// Release a lease held by `owner_id`. Returns `false` if the lock is
    /// free or held by someone else.
    pub async fn release(&self, lock_name: &str, owner_id: &str) -> Result<bool> {
        let released = self.store.remove_if_owned(lock_name, owner_id).await?;
        if released {
            info!(target: "coord::mutex", lock = %lock_name, owner = %owner_id, "lock released");
        } else {
            debug!(
                target: "coord::mutex",
                lock = %lock_name,
                owner = %owner_id,
                "release refused: not held by caller"
            );
        }
        Ok(released)
    }

    /// Push the lease out to `now + additional_ttl`. Must be called before the
    /// current lease lapses, otherwise someone else may already hold it.
    pub async fn extend(
        &self,
        lock_name: &str,
        owner_id: &str,
        additional_ttl: Duration,
    ) -> Result<bool> {
        validate_ttl(additional_ttl)?;

        let Some(current) = self.store.load(lock_name).await? else {
            return Ok(false);
        };
        if !current.is_owned_by(owner_id) {
            return Ok(false);
        }

        let extended = Lock {
            expires_at: expiry_after(self.clock.now(), additional_ttl)?,
            ..current
        };
        let ok = self.store.replace_if_owned(&extended, additional_ttl).await?;
        if ok {
            debug!(
                target: "coord::mutex",
                lock = %lock_name,
                owner = %owner_id,
                expires_at = %extended.expires_at,
                "lock extended"
            );
        }
        Ok(ok)
    }

    /// Current holder, or `None` when the lock is free.
    pub async fn get_holder(&self, lock_name: &str) -> Result<Option<Lock>> {
        self.store.load(lock_name).await
    }

    /// Shorthand for `get_holder(..).is_some()`.
    pub async fn is_locked(&self, lock_name: &str) -> Result<bool> {
        Ok(self.get_holder(lock_name).await?.is_some())
    }

    /// Administrative override that ignores ownership. `actor` identifies who
    /// asked for it and is written to the audit log.
    pub async fn force_release(&self, lock_name: &str, actor: &str) -> Result<bool> {
        let previous = self.store.load(lock_name).await?;
        let removed = self.store.remove(lock_name).await?;
        warn!(
            target: "coord::mutex",
            lock = %lock_name,
            actor = %actor,
            removed,
            previous_owner = ?previous.as_ref().map(|l| l.owner_id.as_str()),
            previous_operation = ?previous.as_ref().map(|l| l.operation.as_str()),
            "lock force-released"
        );
        Ok(removed)
    }

    fn new_record(&self, request: &LockRequest<'_>, ttl: Duration) -> Result<Lock> {
        let now = self.clock.now();
        Ok(Lock {
            lock_name: request.lock_name.to_string(),
            owner_id: request.owner_id.to_string(),
            owner_display: request.owner_display.to_string(),
            operation: request.operation.to_string(),
            acquired_at: now,
            expires_at: expiry_after(now, ttl)?,
        })
    }
}

fn validate_ttl(ttl: Duration) -> Result<()> {
    if ttl.as_millis() == 0 {
        return Err(CoordinationError::InvalidArgument(
            "lock ttl must be at least one millisecond".into(),
        ));
    }
    Ok(())
}

/// `now + ttl`, rejecting leases that run past what a timestamp can hold.
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            CoordinationError::InvalidArgument(format!("lock ttl {ttl:?} is out of range"))
        })
}
