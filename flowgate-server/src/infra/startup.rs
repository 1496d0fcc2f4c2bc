use std::{sync::Arc, time::Duration};

use anyhow::Result;
use flowgate_config::Config;
use flowgate_core::{
    bus::{ChannelPositionNotifier, EventBus, EventBusConfig, Relay},
    mutex::{InMemoryLockStore, LockStore, MutexService},
    queue::{AdmissionQueue, InMemoryQueueStore, QueueStore},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infra::{
    app_context::{AppContext, StoreBackend},
    redis::{self, RedisLockStore, RedisQueueStore, RedisRelay},
};

/// Wire the three services to Redis, or to in-memory stores when no Redis URL
/// is configured.
pub async fn build_context(config: Arc<Config>) -> Result<AppContext> {
    let bus_config = EventBusConfig {
        poll_interval: config.bus.poll_interval,
        reconnect_interval: config.bus.reconnect_interval,
        shutdown_timeout: config.bus.shutdown_timeout,
        connect_timeout: config.bus.connect_timeout,
    };

    let (lock_store, queue_store, bus, backend): (
        Arc<dyn LockStore>,
        Arc<dyn QueueStore>,
        EventBus,
        StoreBackend,
    ) = match config.redis.as_ref() {
        Some(redis_config) => {
            let (client, manager) = redis::connect(&redis_config.url).await?;
            info!("Connected to Redis");
            let relay: Arc<dyn Relay> = Arc::new(RedisRelay::new(
                client,
                manager.clone(),
                config.bus.namespace.clone(),
            ));
            (
                Arc::new(RedisLockStore::new(
                    manager.clone(),
                    config.mutex.key_prefix.clone(),
                )),
                Arc::new(RedisQueueStore::new(manager)),
                EventBus::new(relay, bus_config),
                StoreBackend::Redis,
            )
        }
        None => {
            warn!("Running coordination services in memory; do not scale past one instance");
            (
                Arc::new(InMemoryLockStore::new()),
                Arc::new(InMemoryQueueStore::new()),
                EventBus::local_only(bus_config),
                StoreBackend::InMemory,
            )
        }
    };

    let bus = Arc::new(bus);
    let mutex = MutexService::new(lock_store).with_default_ttl(config.mutex.default_ttl);
    let notifier = ChannelPositionNotifier::new(Arc::clone(&bus))
        .with_channel_prefix(config.queue.channel_prefix.clone());
    let queue = AdmissionQueue::new(queue_store, Arc::new(notifier))
        .with_key(config.queue.key.clone());

    Ok(AppContext::new(
        config,
        Arc::new(mutex),
        Arc::new(queue),
        bus,
        backend,
    ))
}

/// Periodic queue cleanup, supervised by a cancellation token.
#[derive(Debug)]
pub struct Maintenance {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Maintenance {
    pub fn spawn(context: AppContext) -> Self {
        let token = CancellationToken::new();
        let child = token.child_token();
        let handle = tokio::spawn(run_maintenance(context, child));
        Self { token, handle }
    }

    /// Stop the task and wait for the current pass, if any, to finish.
    pub async fn shutdown(self, timeout: Duration) {
        self.token.cancel();
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => debug!("maintenance task stopped"),
            Ok(Err(err)) => warn!(error = %err, "maintenance task failed"),
            Err(_) => {
                warn!("maintenance task did not stop in time; aborting");
                abort.abort();
            }
        }
    }
}

async fn run_maintenance(context: AppContext, token: CancellationToken) {
    let queue_config = &context.config().queue;
    let max_age = queue_config.max_age;
    let mut interval = tokio::time::interval(queue_config.cleanup_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        max_age_secs = max_age.as_secs(),
        interval_secs = queue_config.cleanup_interval.as_secs(),
        "queue maintenance started"
    );

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        match context.queue().cleanup_stale(max_age).await {
            Ok(0) => {}
            Ok(removed) => info!(removed, "stale queue entries removed"),
            Err(err) => warn!(error = %err, "queue cleanup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_config::{BusConfig, ConfigMetadata, MutexConfig, QueueConfig, ServerConfig};

    fn in_memory_config(cleanup_interval: Duration) -> Arc<Config> {
        Arc::new(Config {
            server: ServerConfig::default(),
            redis: None,
            mutex: MutexConfig::default(),
            queue: QueueConfig {
                max_age: Duration::from_secs(60),
                cleanup_interval,
                ..QueueConfig::default()
            },
            bus: BusConfig::default(),
            metadata: ConfigMetadata::default(),
        })
    }

    #[tokio::test]
    async fn without_redis_everything_is_in_memory() {
        let context = build_context(in_memory_config(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(context.backend(), StoreBackend::InMemory);
        assert_eq!(context.mutex().default_ttl(), Duration::from_secs(300));
        assert_eq!(context.queue().key(), "execution:queue");
    }

    #[tokio::test]
    async fn maintenance_stops_promptly() {
        let context = build_context(in_memory_config(Duration::from_secs(3600)))
            .await
            .unwrap();
        let maintenance = Maintenance::spawn(context);
        tokio::time::timeout(
            Duration::from_millis(500),
            maintenance.shutdown(Duration::from_secs(1)),
        )
        .await
        .expect("maintenance shutdown returned");
    }
}
