use async_trait::async_trait;
use flowgate_core::bus::{Relay, RelayEnvelope, RelayError, RelaySubscription};
use futures_util::{Stream, StreamExt};
use redis::aio::ConnectionManager;
use std::{fmt, pin::Pin, time::Duration};
use tracing::debug;

/// Redis pub/sub relay. Every bus channel `c` maps to the Redis channel
/// `<namespace>:c`; subscribers pattern-match the whole namespace.
#[derive(Clone)]
pub struct RedisRelay {
    client: redis::Client,
    redis: ConnectionManager,
    namespace: String,
}

impl fmt::Debug for RedisRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRelay")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisRelay {
    pub fn new(
        client: redis::Client,
        redis: ConnectionManager,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            redis,
            namespace: namespace.into(),
        }
    }

    fn redis_channel(&self, channel: &str) -> String {
        format!("{}:{}", self.namespace, channel)
    }
}

fn unavailable(err: redis::RedisError) -> RelayError {
    RelayError::Unavailable(err.to_string())
}

#[async_trait]
impl Relay for RedisRelay {
    async fn publish(&self, envelope: &RelayEnvelope) -> Result<(), RelayError> {
        let body = serde_json::to_string(envelope)
            .map_err(|err| RelayError::Malformed(err.to_string()))?;
        let mut conn = self.redis.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(self.redis_channel(&envelope.channel))
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(target: "coord::bus", channel = %envelope.channel, receivers, "published to redis");
        Ok(())
    }

    async fn subscribe(&self) -> Result<Box<dyn RelaySubscription>, RelayError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        let pattern = format!("{}:*", self.namespace);
        pubsub.psubscribe(&pattern).await.map_err(unavailable)?;
        debug!(target: "coord::bus", %pattern, "subscribed to redis relay");
        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = redis::Msg> + Send>>,
}

#[async_trait]
impl RelaySubscription for RedisSubscription {
    async fn next_envelope(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<RelayEnvelope>, RelayError> {
        let msg = match tokio::time::timeout(timeout, self.messages.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(RelayError::Closed),
            Ok(Some(msg)) => msg,
        };
        let body: String = msg
            .get_payload()
            .map_err(|err| RelayError::Malformed(err.to_string()))?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|err| RelayError::Malformed(err.to_string()))
    }

    async fn close(self: Box<Self>) {
        // Dropping the stream closes the dedicated pub/sub connection.
        drop(self);
    }
}
