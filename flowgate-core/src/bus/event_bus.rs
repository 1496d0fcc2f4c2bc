use parking_lot::Mutex as SyncMutex;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{ConnectionId, Deliverable};
use super::registry::ConnectionRegistry;
use super::relay::{Relay, RelayEnvelope, RelayError, RelaySubscription};

/// Lifecycle of this process's link to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Nothing has needed the relay yet.
    Uninitialized,
    /// A subscribe attempt is in flight.
    Connecting,
    /// Subscribed, listener running; publishes go through the relay.
    Active,
    /// Relay lost; delivery is local-only until a reconnect succeeds.
    Degraded,
    /// Terminal; the relay is never used again.
    ShutDown,
}

impl RelayState {
    /// Stable lowercase name, as reported by health checks.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::ShutDown => "shut_down",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing knobs for the relay link.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Upper bound on one listener wait; also bounds how long a shutdown
    /// request can go unnoticed.
    pub poll_interval: Duration,
    /// Minimum gap between reconnect attempts while degraded.
    pub reconnect_interval: Duration,
    /// How long shutdown waits for the listener to exit.
    pub shutdown_timeout: Duration,
    /// Upper bound on a single relay subscribe or publish. Expiry counts as
    /// the relay being unavailable.
    pub connect_timeout: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// How a publish was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the relay; every process (this one included) delivers it.
    Relayed,
    /// Relay unavailable; delivered straight to this process's subscribers.
    LocalOnly {
        /// Local connections that accepted the message
        delivered: usize,
    },
}

/// Whether a caller may block on an in-flight relay initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitWait {
    Wait,
    Skip,
}

struct ListenerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fan-out of JSON messages to live connections on every process.
///
/// Construct one per process and share it; call [`EventBus::shutdown`] before
/// exit so the relay listener is joined and its connection closed.
pub struct EventBus {
    process_id: Uuid,
    registry: ConnectionRegistry,
    relay: Option<Arc<dyn Relay>>,
    config: EventBusConfig,
    state: Arc<SyncMutex<RelayState>>,
    /// Serialises relay (re)initialisation so concurrent first use spawns one
    /// listener.
    init_lock: Mutex<()>,
    last_attempt: SyncMutex<Option<Instant>>,
    listener: Mutex<Option<ListenerHandle>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("process_id", &self.process_id)
            .field("state", &self.state())
            .field("registry", &self.registry)
            .field("has_relay", &self.relay.is_some())
            .finish()
    }
}

impl EventBus {
    /// Bus that relays through `relay`. Nothing is opened until the first
    /// connect or publish.
    pub fn new(relay: Arc<dyn Relay>, config: EventBusConfig) -> Self {
        Self::build(Some(relay), config)
    }

    /// Bus without a relay: every publish is local-only.
    pub fn local_only(config: EventBusConfig) -> Self {
        Self::build(None, config)
    }

    fn build(relay: Option<Arc<dyn Relay>>, config: EventBusConfig) -> Self {
        Self {
            process_id: Uuid::now_v7(),
            registry: ConnectionRegistry::new(),
            relay,
            config,
            state: Arc::new(SyncMutex::new(RelayState::Uninitialized)),
            init_lock: Mutex::new(()),
            last_attempt: SyncMutex::new(None),
            listener: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Identifies this process's publishes on the relay.
    pub fn process_id(&self) -> Uuid {
        self.process_id
    }

    /// Current relay link state.
    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    /// Live connections registered on this process.
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Local subscribers of `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.registry.subscriber_count(channel)
    }

    /// Register `connection` on `channels` and make sure the relay link is up.
    pub async fn connect<I, S>(&self, connection: Arc<dyn Deliverable>, channels: I) -> ConnectionId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = self.registry.register(connection, channels);
        debug!(
            target: "coord::bus",
            connection_id = %id,
            channels = ?self.registry.channels_of(&id),
            "connection registered"
        );
        self.ensure_relay(InitWait::Wait).await;
        id
    }

    /// Drop a connection from every channel. No-op if it is already gone.
    pub fn disconnect(&self, id: ConnectionId) {
        if self.registry.remove(id) {
            debug!(target: "coord::bus", connection_id = %id, "connection removed");
        }
    }

    /// Add a channel to a live connection. Returns `false` if it is unknown.
    pub fn subscribe(&self, id: ConnectionId, channel: impl Into<String>) -> bool {
        self.registry.subscribe(id, channel)
    }

    /// Remove one channel from a connection. Returns whether it was joined.
    pub fn unsubscribe(&self, id: ConnectionId, channel: &str) -> bool {
        self.registry.unsubscribe(id, channel)
    }

    /// Publish `payload` on `channel` to subscribers on every process.
    ///
    /// Never fails. When the relay is unusable, slower than
    /// `connect_timeout`, or still being brought up by another caller, the
    /// message only reaches this process's subscribers.
    pub async fn publish(
        &self,
        channel: impl Into<String>,
        payload: serde_json::Value,
    ) -> PublishOutcome {
        let channel = channel.into();

        if let Some(relay) = self.relay.as_ref()
            && self.ensure_relay(InitWait::Skip).await
        {
            let envelope = RelayEnvelope {
                origin: self.process_id,
                channel,
                payload,
            };
            let published =
                tokio::time::timeout(self.config.connect_timeout, relay.publish(&envelope))
                    .await
                    .unwrap_or(Err(RelayError::TimedOut(self.config.connect_timeout)));
            match published {
                Ok(()) => {
                    if !relay.echoes_own_messages() {
                        // Our listener will never see this one.
                        self.registry
                            .deliver(&envelope.channel, &envelope.payload.to_string())
                            .await;
                    }
                    return PublishOutcome::Relayed;
                }
                Err(err) => {
                    warn!(
                        target: "coord::bus",
                        channel = %envelope.channel,
                        error = %err,
                        "relay publish failed; delivering locally"
                    );
                    mark_degraded(&self.state);
                    let delivered = self
                        .registry
                        .deliver(&envelope.channel, &envelope.payload.to_string())
                        .await;
                    return PublishOutcome::LocalOnly { delivered };
                }
            }
        }

        let delivered = self.registry.deliver(&channel, &payload.to_string()).await;
        PublishOutcome::LocalOnly { delivered }
    }

    /// Bring the relay link up if it is not already. Returns whether the bus
    /// is in relay mode afterwards.
    async fn ensure_relay(&self, wait: InitWait) -> bool {
        let Some(relay) = self.relay.as_ref() else {
            return false;
        };
        match self.state() {
            RelayState::Active => return true,
            RelayState::ShutDown => return false,
            _ => {}
        }

        let _guard = match wait {
            InitWait::Wait => self.init_lock.lock().await,
            InitWait::Skip => match self.init_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!(target: "coord::bus", "relay initialisation in flight; delivering locally");
                    return false;
                }
            },
        };
        match self.state() {
            RelayState::Active => return true,
            RelayState::ShutDown => return false,
            RelayState::Degraded if self.throttled() => return false,
            _ => {}
        }

        *self.last_attempt.lock() = Some(Instant::now());
        set_state(&self.state, RelayState::Connecting);

        let subscribed = tokio::time::timeout(self.config.connect_timeout, relay.subscribe())
            .await
            .unwrap_or(Err(RelayError::TimedOut(self.config.connect_timeout)));
        let subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(target: "coord::bus", error = %err, "relay unavailable; delivering locally");
                set_state(&self.state, RelayState::Degraded);
                return false;
            }
        };

        let mut listener = self.listener.lock().await;
        if let Some(previous) = listener.take() {
            previous.token.cancel();
            join_listener(previous.handle, self.config.shutdown_timeout).await;
        }
        if self.shutdown.is_cancelled() {
            subscription.close().await;
            return false;
        }

        set_state(&self.state, RelayState::Active);
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(run_listener(
            subscription,
            ListenerContext {
                process_id: self.process_id,
                echo: relay.echoes_own_messages(),
                poll_interval: self.config.poll_interval,
                registry: self.registry.clone(),
                state: Arc::clone(&self.state),
            },
            token.clone(),
        ));
        *listener = Some(ListenerHandle { token, handle });
        info!(target: "coord::bus", process_id = %self.process_id, "relay active");
        true
    }

    fn throttled(&self) -> bool {
        self.last_attempt
            .lock()
            .is_some_and(|at| at.elapsed() < self.config.reconnect_interval)
    }

    /// Stop the listener, wait for it to close the relay connection, and
    /// refuse relay use from here on. Idempotent.
    pub async fn shutdown(&self) {
        set_state(&self.state, RelayState::ShutDown);
        self.shutdown.cancel();

        let _guard = self.init_lock.lock().await;
        let Some(ListenerHandle { handle, .. }) = self.listener.lock().await.take() else {
            return;
        };

        join_listener(handle, self.config.shutdown_timeout).await;
    }
}

/// Wait for a cancelled listener to exit, aborting it after `timeout`.
async fn join_listener(handle: JoinHandle<()>, timeout: Duration) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => info!(target: "coord::bus", "relay listener stopped"),
        Ok(Err(err)) => warn!(target: "coord::bus", error = %err, "relay listener task failed"),
        Err(_) => {
            warn!(target: "coord::bus", "relay listener did not stop in time; aborting");
            abort.abort();
        }
    }
}

struct ListenerContext {
    process_id: Uuid,
    echo: bool,
    poll_interval: Duration,
    registry: ConnectionRegistry,
    state: Arc<SyncMutex<RelayState>>,
}

async fn run_listener(
    mut subscription: Box<dyn RelaySubscription>,
    ctx: ListenerContext,
    token: CancellationToken,
) {
    debug!(target: "coord::bus", "relay listener started");
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            next = subscription.next_envelope(ctx.poll_interval) => next,
        };

        match next {
            Ok(Some(envelope)) => {
                if envelope.origin == ctx.process_id && !ctx.echo {
                    // Already delivered locally at publish time.
                    continue;
                }
                let delivered = ctx
                    .registry
                    .deliver(&envelope.channel, &envelope.payload.to_string())
                    .await;
                debug!(
                    target: "coord::bus",
                    channel = %envelope.channel,
                    delivered,
                    "relayed message delivered"
                );
            }
            Ok(None) => {}
            Err(RelayError::Malformed(reason)) => {
                warn!(target: "coord::bus", %reason, "dropping malformed relay message");
            }
            Err(err) => {
                warn!(target: "coord::bus", error = %err, "relay listener lost its subscription");
                mark_degraded(&ctx.state);
                break;
            }
        }
    }
    subscription.close().await;
    debug!(target: "coord::bus", "relay listener exited");
}

fn set_state(state: &SyncMutex<RelayState>, next: RelayState) {
    let mut guard = state.lock();
    if *guard != RelayState::ShutDown {
        *guard = next;
    }
}

fn mark_degraded(state: &SyncMutex<RelayState>) {
    let mut guard = state.lock();
    if *guard == RelayState::Active {
        *guard = RelayState::Degraded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::connection::Connection;
    use crate::bus::relay::{InMemoryRelay, InMemoryRelayHub};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn fast_config() -> EventBusConfig {
        EventBusConfig {
            poll_interval: Duration::from_millis(20),
            reconnect_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_millis(200),
        }
    }

    fn connection() -> (Arc<Connection>, mpsc::Receiver<String>) {
        let (conn, rx) = Connection::channel(16);
        (Arc::new(conn), rx)
    }

    async fn recv(rx: &mut mpsc::Receiver<String>) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Relay whose network path hangs: no call ever completes.
    struct StalledRelay;

    #[async_trait]
    impl Relay for StalledRelay {
        async fn publish(&self, _envelope: &RelayEnvelope) -> Result<(), RelayError> {
            std::future::pending().await
        }

        async fn subscribe(&self) -> Result<Box<dyn RelaySubscription>, RelayError> {
            std::future::pending().await
        }
    }

    /// Subscribes fine, then hangs on every publish.
    struct StalledPublish(InMemoryRelay);

    #[async_trait]
    impl Relay for StalledPublish {
        async fn publish(&self, _envelope: &RelayEnvelope) -> Result<(), RelayError> {
            std::future::pending().await
        }

        async fn subscribe(&self) -> Result<Box<dyn RelaySubscription>, RelayError> {
            self.0.subscribe().await
        }
    }

    #[tokio::test]
    async fn first_use_activates_relay() {
        let hub = InMemoryRelayHub::new(64);
        let bus = EventBus::new(Arc::new(hub.relay()), fast_config());
        assert_eq!(bus.state(), RelayState::Uninitialized);

        let (conn, _rx) = connection();
        bus.connect(conn, ["execution:1"]).await;
        assert_eq!(bus.state(), RelayState::Active);
        assert_eq!(hub.subscriber_count(), 1);

        bus.shutdown().await;
        assert_eq!(bus.state(), RelayState::ShutDown);
    }

    #[tokio::test]
    async fn concurrent_first_use_starts_one_listener() {
        let hub = InMemoryRelayHub::new(64);
        let bus = Arc::new(EventBus::new(Arc::new(hub.relay()), fast_config()));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let bus = Arc::clone(&bus);
            tasks.push(tokio::spawn(async move {
                let (conn, rx) = connection();
                bus.connect(conn, ["execution:1"]).await;
                rx
            }));
        }
        let mut receivers = Vec::new();
        for task in tasks {
            receivers.push(task.await.unwrap());
        }

        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(bus.subscriber_count("execution:1"), 8);

        assert_eq!(
            bus.publish("execution:1", json!({"n": 1})).await,
            PublishOutcome::Relayed
        );
        for rx in receivers.iter_mut() {
            assert_eq!(recv(rx).await.as_deref(), Some("{\"n\":1}"));
        }
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn echo_relay_delivers_once_to_local_subscriber() {
        let hub = InMemoryRelayHub::new(64);
        let bus = EventBus::new(Arc::new(hub.relay()), fast_config());
        let (conn, mut rx) = connection();
        bus.connect(conn, ["execution:42"]).await;

        bus.publish("execution:42", json!({"status": "done"})).await;
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"status\":\"done\"}"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn non_echo_relay_delivers_once_to_local_subscriber() {
        let hub = InMemoryRelayHub::new(64);
        let bus = EventBus::new(Arc::new(hub.relay().without_echo()), fast_config());
        let (conn, mut rx) = connection();
        bus.connect(conn, ["execution:42"]).await;

        assert_eq!(
            bus.publish("execution:42", json!({"status": "done"})).await,
            PublishOutcome::Relayed
        );
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"status\":\"done\"}"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_relay_falls_back_to_local_delivery() {
        let hub = InMemoryRelayHub::new(64);
        let relay = hub.relay();
        relay.set_available(false);
        let bus = EventBus::new(Arc::new(relay), fast_config());

        let (conn, mut rx) = connection();
        bus.connect(conn, ["execution:7"]).await;
        assert_eq!(bus.state(), RelayState::Degraded);

        let outcome = bus.publish("execution:7", json!({"n": 7})).await;
        assert_eq!(outcome, PublishOutcome::LocalOnly { delivered: 1 });
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"n\":7}"));

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn lost_relay_degrades_then_recovers() {
        let hub = InMemoryRelayHub::new(64);
        let relay = hub.relay();
        let bus = EventBus::new(Arc::new(relay.clone()), fast_config());
        let (conn, mut rx) = connection();
        bus.connect(conn, ["execution:1"]).await;
        assert_eq!(bus.state(), RelayState::Active);

        relay.set_available(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(bus.state(), RelayState::Degraded);

        assert_eq!(
            bus.publish("execution:1", json!({"n": 1})).await,
            PublishOutcome::LocalOnly { delivered: 1 }
        );
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"n\":1}"));

        relay.set_available(true);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            bus.publish("execution:1", json!({"n": 2})).await,
            PublishOutcome::Relayed
        );
        assert_eq!(bus.state(), RelayState::Active);
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"n\":2}"));
        assert_eq!(hub.subscriber_count(), 1);

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn local_only_bus_never_touches_a_relay() {
        let bus = EventBus::local_only(fast_config());
        let (conn, mut rx) = connection();
        bus.connect(conn, ["user:3"]).await;

        assert_eq!(
            bus.publish("user:3", json!("hi")).await,
            PublishOutcome::LocalOnly { delivered: 1 }
        );
        assert_eq!(recv(&mut rx).await.as_deref(), Some("\"hi\""));
        assert_eq!(bus.state(), RelayState::Uninitialized);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_prompt_and_idempotent() {
        let hub = InMemoryRelayHub::new(64);
        let config = EventBusConfig {
            poll_interval: Duration::from_secs(30),
            ..fast_config()
        };
        let bus = EventBus::new(Arc::new(hub.relay()), config);
        let (conn, _rx) = connection();
        bus.connect(conn, ["execution:1"]).await;

        tokio::time::timeout(Duration::from_millis(500), bus.shutdown())
            .await
            .expect("shutdown must not wait for the poll window");
        bus.shutdown().await;

        assert_eq!(hub.subscriber_count(), 0);
        assert!(matches!(
            bus.publish("execution:1", json!({})).await,
            PublishOutcome::LocalOnly { .. }
        ));
    }

    #[tokio::test]
    async fn publish_skips_an_initialisation_in_flight() {
        let config = EventBusConfig {
            connect_timeout: Duration::from_secs(30),
            ..fast_config()
        };
        let bus = Arc::new(EventBus::new(Arc::new(StalledRelay), config));
        let (conn, mut rx) = connection();
        let connecting = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.connect(conn, ["execution:1"]).await })
        };

        tokio::time::timeout(Duration::from_secs(1), async {
            while bus.state() != RelayState::Connecting {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay initialisation started");

        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            bus.publish("execution:1", json!({"n": 1})),
        )
        .await
        .expect("publish must not wait for the relay");
        assert_eq!(outcome, PublishOutcome::LocalOnly { delivered: 1 });
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"n\":1}"));

        connecting.abort();
    }

    #[tokio::test]
    async fn stalled_subscribe_times_out_into_degraded() {
        let bus = EventBus::new(Arc::new(StalledRelay), fast_config());
        let (conn, mut rx) = connection();

        tokio::time::timeout(Duration::from_secs(2), bus.connect(conn, ["execution:1"]))
            .await
            .expect("connect is bounded by connect_timeout");
        assert_eq!(bus.state(), RelayState::Degraded);

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            bus.publish("execution:1", json!({"n": 2})),
        )
        .await
        .expect("publish is bounded by connect_timeout");
        assert_eq!(outcome, PublishOutcome::LocalOnly { delivered: 1 });
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"n\":2}"));

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_publish_falls_back_to_local_delivery() {
        let hub = InMemoryRelayHub::new(16);
        let bus = EventBus::new(Arc::new(StalledPublish(hub.relay())), fast_config());
        let (conn, mut rx) = connection();
        bus.connect(conn, ["execution:1"]).await;
        assert_eq!(bus.state(), RelayState::Active);

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            bus.publish("execution:1", json!({"n": 3})),
        )
        .await
        .expect("publish is bounded by connect_timeout");
        assert_eq!(outcome, PublishOutcome::LocalOnly { delivered: 1 });
        assert_eq!(bus.state(), RelayState::Degraded);
        assert_eq!(recv(&mut rx).await.as_deref(), Some("{\"n\":3}"));

        bus.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let bus = EventBus::local_only(fast_config());
        let (conn, _rx) = connection();
        let id = bus.connect(conn, ["a", "b"]).await;
        bus.disconnect(id);
        bus.disconnect(id);
        assert_eq!(bus.connection_count(), 0);
        assert_eq!(bus.subscriber_count("a"), 0);
    }
}
