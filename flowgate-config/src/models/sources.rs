use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::env_string;

/// Raw configuration as defined in a TOML file.
///
/// Durations stay as strings here (`"30s"`, `"5m"`) and are parsed when the
/// loader composes the final [`Config`](super::Config).
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub mutex: FileMutexConfig,
    #[serde(default)]
    pub queue: FileQueueConfig,
    #[serde(default)]
    pub bus: FileBusConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMutexConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileQueueConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBusConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_buffer: Option<usize>,
}

/// Environment-derived configuration values, unparsed.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<String>,
    pub redis_url: Option<String>,
    pub lock_key_prefix: Option<String>,
    pub lock_default_ttl: Option<String>,
    pub queue_key: Option<String>,
    pub queue_channel_prefix: Option<String>,
    pub queue_max_age: Option<String>,
    pub queue_cleanup_interval: Option<String>,
    pub bus_namespace: Option<String>,
    pub bus_poll_interval: Option<String>,
    pub bus_reconnect_interval: Option<String>,
    pub bus_shutdown_timeout: Option<String>,
    pub bus_connect_timeout: Option<String>,
    pub bus_outbound_buffer: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: env_string("FLOWGATE_CONFIG").map(PathBuf::from),
            server_host: env_string("SERVER_HOST"),
            server_port: env_string("SERVER_PORT"),
            redis_url: env_string("REDIS_URL"),
            lock_key_prefix: env_string("LOCK_KEY_PREFIX"),
            lock_default_ttl: env_string("LOCK_DEFAULT_TTL"),
            queue_key: env_string("QUEUE_KEY"),
            queue_channel_prefix: env_string("QUEUE_CHANNEL_PREFIX"),
            queue_max_age: env_string("QUEUE_MAX_AGE"),
            queue_cleanup_interval: env_string("QUEUE_CLEANUP_INTERVAL"),
            bus_namespace: env_string("BUS_NAMESPACE"),
            bus_poll_interval: env_string("BUS_POLL_INTERVAL"),
            bus_reconnect_interval: env_string("BUS_RECONNECT_INTERVAL"),
            bus_shutdown_timeout: env_string("BUS_SHUTDOWN_TIMEOUT"),
            bus_connect_timeout: env_string("BUS_CONNECT_TIMEOUT"),
            bus_outbound_buffer: env_string("BUS_OUTBOUND_BUFFER"),
        }
    }
}
