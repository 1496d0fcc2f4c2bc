//! Redis implementations of the coordination ports.

mod lock_store;
mod queue_store;
mod relay;

pub use lock_store::RedisLockStore;
pub use queue_store::RedisQueueStore;
pub use relay::RedisRelay;

use anyhow::{Context, Result};
use flowgate_core::CoordinationError;
use redis::aio::ConnectionManager;

/// Open a client and a multiplexed, auto-reconnecting command connection.
pub async fn connect(redis_url: &str) -> Result<(redis::Client, ConnectionManager)> {
    let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
    let manager = ConnectionManager::new(client.clone())
        .await
        .context("Failed to create Redis connection manager")?;
    Ok((client, manager))
}

/// Connectivity failures become `StoreUnavailable` so callers can tell "the
/// store said no" apart from "the store could not be asked".
pub(crate) fn store_error(err: redis::RedisError) -> CoordinationError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        CoordinationError::StoreUnavailable(err.to_string())
    } else {
        CoordinationError::Store(err.to_string())
    }
}
