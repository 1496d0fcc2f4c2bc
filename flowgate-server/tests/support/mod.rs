#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use flowgate_config::{
    BusConfig, Config, ConfigMetadata, MutexConfig, QueueConfig, RedisConfig, ServerConfig,
};
use flowgate_server::infra::{app_context::AppContext, startup::build_context};
use serde_json::Value;

pub fn test_config(redis_url: Option<String>) -> Arc<Config> {
    Arc::new(Config {
        server: ServerConfig::default(),
        redis: redis_url.map(|url| RedisConfig { url }),
        mutex: MutexConfig::default(),
        queue: QueueConfig::default(),
        bus: BusConfig {
            poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(2),
            ..BusConfig::default()
        },
        metadata: ConfigMetadata::default(),
    })
}

pub async fn in_memory_app() -> (AppContext, Router) {
    let context = build_context(test_config(None))
        .await
        .expect("in-memory context");
    let app = flowgate_server::routes::create_app(context.clone());
    (context, app)
}

pub fn json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub async fn parse_json_response(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body");
    serde_json::from_slice(&bytes).expect("json body")
}
