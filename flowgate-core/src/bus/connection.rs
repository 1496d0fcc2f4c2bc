use async_trait::async_trait;
use std::{fmt, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Process-unique handle for one registered connection.
pub type ConnectionId = Uuid;

/// How long a send may wait on a full outbound buffer before the connection
/// is treated as dead.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a single send to a connection failed. Any of these gets the
/// connection pruned from the registry.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The receiving half is gone.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// The outbound buffer stayed full for the whole send timeout.
    #[error("connection {0} did not accept the message in time")]
    TimedOut(ConnectionId),

    /// Transport specific failure.
    #[error("delivery to connection {id} failed: {reason}")]
    Failed { id: ConnectionId, reason: String },
}

/// Anything the bus can push text frames to.
#[async_trait]
pub trait Deliverable: Send + Sync {
    /// Stable id used as the registry key.
    fn id(&self) -> ConnectionId;

    /// Push one serialized message.
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError>;

    /// True once the far side is known to be gone.
    fn is_closed(&self) -> bool;
}

/// Connection backed by a bounded channel drained by a transport writer task
/// (for example the WebSocket sink).
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<String>,
    send_timeout: Duration,
    label: Option<String>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    /// Wrap an existing sender with a fresh id.
    pub fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            sender,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            label: None,
        }
    }

    /// New connection plus the receiving half its writer task should drain.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    /// Name shown in debug output, e.g. the transport.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Override [`DEFAULT_SEND_TIMEOUT`].
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

#[async_trait]
impl Deliverable for Connection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        self.sender
            .send_timeout(text.to_owned(), self.send_timeout)
            .await
            .map_err(|err| match err {
                mpsc::error::SendTimeoutError::Closed(_) => DeliveryError::Closed(self.id),
                mpsc::error::SendTimeoutError::Timeout(_) => DeliveryError::TimedOut(self.id),
            })
    }

    fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
