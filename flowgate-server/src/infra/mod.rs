pub mod app_context;
pub mod errors;
pub mod redis;
pub mod startup;
pub mod websocket;
