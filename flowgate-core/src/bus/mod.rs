//! Cross-process event bus.
//!
//! Every process keeps its own [`ConnectionRegistry`] of live client
//! connections. Publishes normally travel through a shared [`Relay`] and come
//! back to each process through its listener, so there is a single fan-out
//! path. When the relay cannot be reached the bus delivers to its own
//! subscribers directly and keeps going.

mod connection;
mod event_bus;
mod notifier;
mod registry;
mod relay;

pub use connection::{Connection, ConnectionId, DEFAULT_SEND_TIMEOUT, Deliverable, DeliveryError};
pub use event_bus::{EventBus, EventBusConfig, PublishOutcome, RelayState};
pub use notifier::{ChannelPositionNotifier, DEFAULT_CHANNEL_PREFIX};
pub use registry::ConnectionRegistry;
pub use relay::{
    InMemoryRelay, InMemoryRelayHub, Relay, RelayEnvelope, RelayError, RelaySubscription,
};
