pub mod sources;

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "lock:";
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_QUEUE_KEY: &str = "execution:queue";
pub const DEFAULT_QUEUE_CHANNEL_PREFIX: &str = "execution:";
pub const DEFAULT_QUEUE_MAX_AGE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_QUEUE_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BUS_NAMESPACE: &str = "flowgate:bus";
pub const DEFAULT_BUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_BUS_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BUS_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BUS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BUS_OUTBOUND_BUFFER: usize = 64;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// `None` runs every component in memory, which is only correct for a
    /// single process.
    pub redis: Option<RedisConfig>,
    pub mutex: MutexConfig,
    pub queue: QueueConfig,
    pub bus: BusConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MutexConfig {
    /// Prepended to every lock name to form its store key
    pub key_prefix: String,
    pub default_ttl: Duration,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_LOCK_KEY_PREFIX.to_string(),
            default_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub key: String,
    /// Position updates for item `X` go out on `<channel_prefix>X`
    pub channel_prefix: String,
    pub max_age: Duration,
    pub cleanup_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_QUEUE_KEY.to_string(),
            channel_prefix: DEFAULT_QUEUE_CHANNEL_PREFIX.to_string(),
            max_age: DEFAULT_QUEUE_MAX_AGE,
            cleanup_interval: DEFAULT_QUEUE_CLEANUP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Pub/sub channel namespace shared by every process
    pub namespace: String,
    pub poll_interval: Duration,
    pub reconnect_interval: Duration,
    pub shutdown_timeout: Duration,
    /// Bound on one relay subscribe or publish
    pub connect_timeout: Duration,
    /// Per-connection outbound message buffer
    pub outbound_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_BUS_NAMESPACE.to_string(),
            poll_interval: DEFAULT_BUS_POLL_INTERVAL,
            reconnect_interval: DEFAULT_BUS_RECONNECT_INTERVAL,
            shutdown_timeout: DEFAULT_BUS_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_BUS_CONNECT_TIMEOUT,
            outbound_buffer: DEFAULT_BUS_OUTBOUND_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
