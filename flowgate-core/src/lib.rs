//! # Flowgate Core
//!
//! Coordination primitives for a fleet of stateless worker processes that
//! share one key-value store.
//!
//! - [`mutex`]: named leases with owner metadata, so a refused caller can be
//!   told who holds the resource and why.
//! - [`queue`]: a shared FIFO admission queue that re-announces positions
//!   whenever the line moves.
//! - [`bus`]: fan-out of JSON messages to live client connections on every
//!   process, with local-only delivery when the relay is down.
//!
//! Storage and transport sit behind traits ([`mutex::LockStore`],
//! [`queue::QueueStore`], [`bus::Relay`]). This crate ships in-memory
//! implementations of each; the server crate provides the Redis ones.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use flowgate_core::{
//!     bus::{ChannelPositionNotifier, EventBus, EventBusConfig},
//!     mutex::{InMemoryLockStore, LockRequest, MutexService},
//!     queue::{AdmissionQueue, InMemoryQueueStore},
//! };
//!
//! # async fn run() -> flowgate_core::Result<()> {
//! let mutex = MutexService::new(Arc::new(InMemoryLockStore::new()));
//! let bus = Arc::new(EventBus::local_only(EventBusConfig::default()));
//! let queue = AdmissionQueue::new(
//!     Arc::new(InMemoryQueueStore::new()),
//!     Arc::new(ChannelPositionNotifier::new(Arc::clone(&bus))),
//! );
//!
//! let request = LockRequest {
//!     lock_name: "deploy",
//!     owner_id: "user-1",
//!     owner_display: "Ada",
//!     operation: "uploading build",
//! };
//! if !mutex.acquire_default(request).await?.is_granted() {
//!     queue.enqueue("job-1").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod clock;
pub mod error;
pub mod mutex;
pub mod queue;

pub use error::{CoordinationError, Result};
