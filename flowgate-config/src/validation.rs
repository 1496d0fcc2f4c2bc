use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("{field} must not be empty")]
    EmptyValue { field: &'static str },
    #[error("BUS_OUTBOUND_BUFFER must be at least 1")]
    ZeroOutboundBuffer,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Reject configurations that cannot work and collect the ones that work
/// badly.
pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    for (field, value) in [
        ("LOCK_DEFAULT_TTL", config.mutex.default_ttl),
        ("QUEUE_MAX_AGE", config.queue.max_age),
        ("QUEUE_CLEANUP_INTERVAL", config.queue.cleanup_interval),
        ("BUS_POLL_INTERVAL", config.bus.poll_interval),
        ("BUS_SHUTDOWN_TIMEOUT", config.bus.shutdown_timeout),
        ("BUS_CONNECT_TIMEOUT", config.bus.connect_timeout),
    ] {
        if value.is_zero() {
            return Err(ConfigGuardRailError::ZeroDuration { field });
        }
    }

    for (field, value) in [
        ("QUEUE_KEY", config.queue.key.as_str()),
        ("BUS_NAMESPACE", config.bus.namespace.as_str()),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigGuardRailError::EmptyValue { field });
        }
    }

    if config.bus.outbound_buffer == 0 {
        return Err(ConfigGuardRailError::ZeroOutboundBuffer);
    }

    if config.redis.is_none() {
        warnings.push_with_hint(
            "REDIS_URL not configured; locks, queue and bus run in memory for this process only",
            "Set REDIS_URL before running more than one instance",
        );
    }

    if config.queue.max_age < config.queue.cleanup_interval {
        warnings.push_with_hint(
            "QUEUE_MAX_AGE is shorter than QUEUE_CLEANUP_INTERVAL",
            "Stale entries can linger up to one cleanup interval past their max age",
        );
    }

    if config.bus.poll_interval > config.bus.shutdown_timeout {
        warnings.push_with_hint(
            "BUS_POLL_INTERVAL exceeds BUS_SHUTDOWN_TIMEOUT",
            "The relay listener may be aborted instead of stopping cleanly on shutdown",
        );
    }

    Ok(warnings)
}
