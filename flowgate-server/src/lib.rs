//! # Flowgate Server
//!
//! HTTP and WebSocket front end for the coordination services in
//! `flowgate-core`, with Redis implementations of their storage and relay
//! ports.
//!
//! - `GET /ws?channels=a,b` streams bus messages for the listed channels.
//!   Clients can send `{"action":"subscribe","channel":"..."}` or
//!   `{"action":"unsubscribe","channel":"..."}` at any time.
//! - `GET /healthz` reports queue depth, relay state and connection count.
//! - `/api/v1/locks/...` and `/api/v1/queue/...` expose leases and the
//!   admission queue.

pub mod handlers;
pub mod infra;
pub mod routes;
