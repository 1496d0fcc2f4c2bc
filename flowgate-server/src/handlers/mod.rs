pub mod handle_health;
pub mod handle_locks;
pub mod handle_queue;
pub mod handle_websocket;

pub use handle_health::health_handler;
pub use handle_websocket::websocket_handler;
