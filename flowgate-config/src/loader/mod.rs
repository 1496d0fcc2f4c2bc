pub mod error;

use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, str::FromStr, time::Duration};
use tracing::debug;

use crate::models::{
    BusConfig, Config, ConfigMetadata, DEFAULT_BUS_CONNECT_TIMEOUT, DEFAULT_BUS_NAMESPACE,
    DEFAULT_BUS_OUTBOUND_BUFFER, DEFAULT_BUS_POLL_INTERVAL, DEFAULT_BUS_RECONNECT_INTERVAL,
    DEFAULT_BUS_SHUTDOWN_TIMEOUT,
    DEFAULT_HOST, DEFAULT_LOCK_KEY_PREFIX, DEFAULT_LOCK_TTL, DEFAULT_PORT,
    DEFAULT_QUEUE_CHANNEL_PREFIX, DEFAULT_QUEUE_CLEANUP_INTERVAL, DEFAULT_QUEUE_KEY,
    DEFAULT_QUEUE_MAX_AGE, MutexConfig, QueueConfig, RedisConfig, ServerConfig,
    sources::{EnvConfig, FileConfig},
};
use crate::util::parse_duration;
use crate::validation::{self, ConfigWarnings};

pub use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("flowgate.toml"),
        PathBuf::from("config/flowgate.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, then the process environment, then the TOML file.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path)
                .map(|_| true)
                .or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose configuration from an already gathered environment. Does not
    /// read `.env` or the process environment.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No flowgate.toml detected; using environment variables and defaults",
                "Create flowgate.toml or point FLOWGATE_CONFIG at one",
            );
        }

        let config = compose_config(file_config.unwrap_or_default(), env, config_path)?;
        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS.iter().find(|c| c.exists()) {
                Some(path) => path.clone(),
                None => return Ok((None, None)),
            },
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "loaded configuration file");

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    config_path: Option<PathBuf>,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        redis: file_redis,
        mutex: file_mutex,
        queue: file_queue,
        bus: file_bus,
    } = file;

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: match env.server_port {
            Some(raw) => parse_value("SERVER_PORT", &raw)?,
            None => file_server.port.unwrap_or(DEFAULT_PORT),
        },
    };

    let redis = env
        .redis_url
        .map(|url| RedisConfig { url })
        .or_else(|| file_redis.map(|r| RedisConfig { url: r.url }));

    let mutex = MutexConfig {
        key_prefix: env
            .lock_key_prefix
            .or(file_mutex.key_prefix)
            .unwrap_or_else(|| DEFAULT_LOCK_KEY_PREFIX.to_string()),
        default_ttl: resolve_duration(
            ("LOCK_DEFAULT_TTL", env.lock_default_ttl),
            ("mutex.default_ttl", file_mutex.default_ttl),
            DEFAULT_LOCK_TTL,
        )?,
    };

    let queue = QueueConfig {
        key: env
            .queue_key
            .or(file_queue.key)
            .unwrap_or_else(|| DEFAULT_QUEUE_KEY.to_string()),
        channel_prefix: env
            .queue_channel_prefix
            .or(file_queue.channel_prefix)
            .unwrap_or_else(|| DEFAULT_QUEUE_CHANNEL_PREFIX.to_string()),
        max_age: resolve_duration(
            ("QUEUE_MAX_AGE", env.queue_max_age),
            ("queue.max_age", file_queue.max_age),
            DEFAULT_QUEUE_MAX_AGE,
        )?,
        cleanup_interval: resolve_duration(
            ("QUEUE_CLEANUP_INTERVAL", env.queue_cleanup_interval),
            ("queue.cleanup_interval", file_queue.cleanup_interval),
            DEFAULT_QUEUE_CLEANUP_INTERVAL,
        )?,
    };

    let bus = BusConfig {
        namespace: env
            .bus_namespace
            .or(file_bus.namespace)
            .unwrap_or_else(|| DEFAULT_BUS_NAMESPACE.to_string()),
        poll_interval: resolve_duration(
            ("BUS_POLL_INTERVAL", env.bus_poll_interval),
            ("bus.poll_interval", file_bus.poll_interval),
            DEFAULT_BUS_POLL_INTERVAL,
        )?,
        reconnect_interval: resolve_duration(
            ("BUS_RECONNECT_INTERVAL", env.bus_reconnect_interval),
            ("bus.reconnect_interval", file_bus.reconnect_interval),
            DEFAULT_BUS_RECONNECT_INTERVAL,
        )?,
        shutdown_timeout: resolve_duration(
            ("BUS_SHUTDOWN_TIMEOUT", env.bus_shutdown_timeout),
            ("bus.shutdown_timeout", file_bus.shutdown_timeout),
            DEFAULT_BUS_SHUTDOWN_TIMEOUT,
        )?,
        connect_timeout: resolve_duration(
            ("BUS_CONNECT_TIMEOUT", env.bus_connect_timeout),
            ("bus.connect_timeout", file_bus.connect_timeout),
            DEFAULT_BUS_CONNECT_TIMEOUT,
        )?,
        outbound_buffer: match env.bus_outbound_buffer {
            Some(raw) => parse_value("BUS_OUTBOUND_BUFFER", &raw)?,
            None => file_bus.outbound_buffer.unwrap_or(DEFAULT_BUS_OUTBOUND_BUFFER),
        },
    };

    Ok(Config {
        server,
        redis,
        mutex,
        queue,
        bus,
        metadata: ConfigMetadata {
            config_path,
            env_file_loaded: false,
        },
    })
}

/// Environment wins over the file; each value is attributed to where it came
/// from in error messages.
fn resolve_duration(
    env: (&str, Option<String>),
    file: (&str, Option<String>),
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    let (field, raw) = match (env, file) {
        ((field, Some(raw)), _) => (field, raw),
        (_, (field, Some(raw))) => (field, raw),
        _ => return Ok(default),
    };
    parse_duration(&raw).map_err(|source| ConfigLoadError::InvalidDuration {
        field: field.to_string(),
        value: raw,
        source,
    })
}

fn parse_value<T>(field: &str, raw: &str) -> Result<T, ConfigLoadError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err: T::Err| ConfigLoadError::InvalidValue {
            field: field.to_string(),
            value: raw.to_string(),
            reason: err.to_string(),
        })
}
