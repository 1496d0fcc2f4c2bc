//! Cross-process relay port and an in-memory hub for tests and
//! single-binary deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What travels between processes: the bus channel, the payload and which
/// process published it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Publishing process id.
    pub origin: Uuid,
    /// Bus channel, without the relay namespace.
    pub channel: String,
    /// Message body delivered to subscribers as-is.
    pub payload: serde_json::Value,
}

/// Relay failures. Every variant except [`RelayError::Malformed`] makes the
/// bus fall back to local-only delivery.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Could not reach the pub/sub server.
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    /// The subscription stream ended.
    #[error("relay subscription closed")]
    Closed,

    /// A subscribe or publish ran past the bus's `connect_timeout`.
    #[error("relay did not answer within {0:?}")]
    TimedOut(Duration),

    /// A single undecodable message; the subscription itself is still fine.
    #[error("malformed relay message: {0}")]
    Malformed(String),
}

/// Cross-process fan-out used by the event bus.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Send one envelope to every subscribed process.
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError>;

    /// Open a subscription to all bus traffic.
    async fn subscribe(&self) -> Result<Box<dyn RelaySubscription>, RelayError>;

    /// Whether a subscription opened through this relay also receives what
    /// this relay publishes. Redis pub/sub does; the bus falls back to direct
    /// local delivery for relays that do not.
    fn echoes_own_messages(&self) -> bool {
        true
    }
}

/// One open subscription to all bus traffic.
#[async_trait]
pub trait RelaySubscription: Send {
    /// Wait at most `timeout` for the next envelope. `Ok(None)` means the
    /// window elapsed with nothing to read.
    async fn next_envelope(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<RelayEnvelope>, RelayError>;

    /// Tear down the underlying connection.
    async fn close(self: Box<Self>);
}

type Frame = (u64, RelayEnvelope);

/// Shared in-memory stand-in for the pub/sub server. Each
/// [`InMemoryRelayHub::relay`] call hands out the equivalent of one process's
/// connection.
pub struct InMemoryRelayHub {
    sender: broadcast::Sender<Frame>,
    next_handle: AtomicU64,
}

impl fmt::Debug for InMemoryRelayHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRelayHub")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InMemoryRelayHub {
    /// Hub buffering up to `capacity` undelivered frames per subscriber.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self {
            sender,
            next_handle: AtomicU64::new(1),
        })
    }

    /// A new handle, as if another process connected.
    pub fn relay(&self) -> InMemoryRelay {
        InMemoryRelay {
            handle: self.next_handle.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            available: Arc::new(AtomicBool::new(true)),
            echo: true,
        }
    }

    /// Open subscriptions across all handles.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One process's handle on an [`InMemoryRelayHub`].
#[derive(Clone)]
pub struct InMemoryRelay {
    handle: u64,
    sender: broadcast::Sender<Frame>,
    available: Arc<AtomicBool>,
    echo: bool,
}

impl fmt::Debug for InMemoryRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryRelay")
            .field("handle", &self.handle)
            .field("available", &self.available.load(Ordering::Relaxed))
            .field("echo", &self.echo)
            .finish()
    }
}

impl InMemoryRelay {
    /// Subscriptions from this handle will not see what it publishes.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Simulate the server becoming unreachable (or reachable again) for
    /// this handle, including subscriptions it already opened.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RelayError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::Unavailable("in-memory relay switched off".into()))
        }
    }
}

#[async_trait]
impl Relay for InMemoryRelay {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        self.check()?;
        // No receivers is not an error for pub/sub.
        let _ = self.sender.send((self.handle, envelope.clone()));
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn RelaySubscription>, RelayError> {
        self.check()?;
        Ok(Box::new(InMemorySubscription {
            relay: self.clone(),
            receiver: self.sender.subscribe(),
        }))
    }

    fn echoes_own_messages(&self) -> bool {
        self.echo
    }
}

struct InMemorySubscription {
    relay: InMemoryRelay,
    receiver: broadcast::Receiver<Frame>,
}

#[async_trait]
impl RelaySubscription for InMemorySubscription {
    async fn next_envelope(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<RelayEnvelope>, RelayError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.relay.check()?;
            let frame = match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Err(_) => return Ok(None),
                Ok(Ok(frame)) => frame,
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(target: "coord::bus", skipped, "in-memory relay subscriber lagged");
                    continue;
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(RelayError::Closed),
            };
            self.relay.check()?;
            if !self.relay.echo && frame.0 == self.relay.handle {
                continue;
            }
            return Ok(Some(frame.1));
        }
    }

    async fn close(self: Box<Self>) {}
}
