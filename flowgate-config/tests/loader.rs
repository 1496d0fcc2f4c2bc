use std::{io::Write, time::Duration};

use flowgate_config::{ConfigLoadError, ConfigLoader, models::sources::EnvConfig};
use tempfile::NamedTempFile;

fn toml_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn file_values_are_loaded() {
    let file = toml_file(
        r#"
[server]
host = "127.0.0.1"
port = 8080

[redis]
url = "redis://cache:6379/2"

[mutex]
key_prefix = "lease:"
default_ttl = "10m"

[queue]
key = "uploads:queue"
channel_prefix = "upload:"
max_age = "2h"
cleanup_interval = "1m"

[bus]
namespace = "uploads:bus"
poll_interval = "500ms"
connect_timeout = "2s"
outbound_buffer = 128
"#,
    );

    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(EnvConfig::default())
        .unwrap();
    let config = load.config;

    assert_eq!(config.bind_address(), "127.0.0.1:8080");
    assert_eq!(config.redis.unwrap().url, "redis://cache:6379/2");
    assert_eq!(config.mutex.key_prefix, "lease:");
    assert_eq!(config.mutex.default_ttl, Duration::from_secs(600));
    assert_eq!(config.queue.key, "uploads:queue");
    assert_eq!(config.queue.channel_prefix, "upload:");
    assert_eq!(config.queue.max_age, Duration::from_secs(7200));
    assert_eq!(config.queue.cleanup_interval, Duration::from_secs(60));
    assert_eq!(config.bus.namespace, "uploads:bus");
    assert_eq!(config.bus.poll_interval, Duration::from_millis(500));
    assert_eq!(config.bus.connect_timeout, Duration::from_secs(2));
    assert_eq!(config.bus.outbound_buffer, 128);
    assert_eq!(config.metadata.config_path.as_deref(), Some(file.path()));
    assert!(load.warnings.is_empty());
}

#[test]
fn env_redis_url_beats_file() {
    let file = toml_file("[redis]\nurl = \"redis://file:6379\"\n");
    let env = EnvConfig {
        redis_url: Some("redis://env:6379".into()),
        ..EnvConfig::default()
    };
    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(env)
        .unwrap();
    assert_eq!(load.config.redis.unwrap().url, "redis://env:6379");
}

#[test]
fn env_connect_timeout_beats_file() {
    let file = toml_file("[bus]\nconnect_timeout = \"2s\"\n");
    let env = EnvConfig {
        bus_connect_timeout: Some("750ms".into()),
        ..EnvConfig::default()
    };
    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(env)
        .unwrap();
    assert_eq!(load.config.bus.connect_timeout, Duration::from_millis(750));
}

#[test]
fn config_path_from_env_is_used() {
    let file = toml_file("[server]\nport = 9001\n");
    let env = EnvConfig {
        config_path: Some(file.path().to_path_buf()),
        ..EnvConfig::default()
    };
    let load = ConfigLoader::new().load_with_env(env).unwrap();
    assert_eq!(load.config.server.port, 9001);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = ConfigLoader::new()
        .with_config_path(&missing)
        .load_with_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::MissingConfig { path } if path == missing));
}

#[test]
fn malformed_file_reports_parse_error() {
    let file = toml_file("[server\nport = 1");
    let err = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}

#[test]
fn bad_file_duration_names_the_key() {
    let file = toml_file("[queue]\nmax_age = \"forever\"\n");
    let err = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(EnvConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidDuration { ref field, .. } if field == "queue.max_age"
    ));
}

#[test]
fn no_redis_produces_a_warning() {
    let file = toml_file("[server]\nport = 3000\n");
    let load = ConfigLoader::new()
        .with_config_path(file.path())
        .load_with_env(EnvConfig::default())
        .unwrap();
    assert!(load.config.redis.is_none());
    assert!(
        load.warnings
            .iter()
            .any(|warning| warning.message.contains("REDIS_URL"))
    );
}
