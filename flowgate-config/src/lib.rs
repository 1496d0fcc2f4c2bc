//! Configuration for Flowgate.
//!
//! Values come from built-in defaults, an optional `flowgate.toml`, a `.env`
//! file and the process environment, in increasing order of precedence.
//! Durations are written the human way (`"30s"`, `"5m"`).

// Field names mirror the env/file keys listed in the README.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    BusConfig, Config, ConfigMetadata, MutexConfig, QueueConfig, RedisConfig, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
