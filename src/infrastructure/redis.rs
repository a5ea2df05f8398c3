//! Redis adapters for the `KeyValueStore` and `PubSub` capabilities.
//!
//! The key-value store carries the shared virtual clock between the
//! orchestrator and gateway processes; the pub/sub adapter feeds the
//! fan-out gateway.

use crate::domain::ports::{KeyValueStore, PubSub, PubSubMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct RedisKeyValueStore {
    connection: redis::aio::MultiplexedConnection,
}

impl RedisKeyValueStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        let value: Option<String> = connection.get(key).await.context("Redis GET failed")?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut connection = self.connection.clone();
        match ttl {
            Some(ttl) => {
                connection
                    .set_ex::<_, _, ()>(key, value, ttl.as_secs())
                    .await
                    .context("Redis SETEX failed")?;
            }
            None => {
                connection
                    .set::<_, _, ()>(key, value)
                    .await
                    .context("Redis SET failed")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection
            .del::<_, ()>(key)
            .await
            .context("Redis DEL failed")?;
        Ok(())
    }
}

pub struct RedisPubSub {
    pubsub: Mutex<redis::aio::PubSub>,
    publisher: redis::aio::MultiplexedConnection,
}

impl RedisPubSub {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let pubsub = client
            .get_async_connection()
            .await
            .context("Failed to open Redis pub/sub connection")?
            .into_pubsub();
        let publisher = client
            .get_multiplexed_tokio_connection()
            .await
            .context("Failed to open Redis publisher connection")?;
        Ok(Self {
            pubsub: Mutex::new(pubsub),
            publisher,
        })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.pubsub
            .lock()
            .await
            .subscribe(channel)
            .await
            .with_context(|| format!("SUBSCRIBE {} failed", channel))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<()> {
        self.pubsub
            .lock()
            .await
            .psubscribe(pattern)
            .await
            .with_context(|| format!("PSUBSCRIBE {} failed", pattern))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.pubsub
            .lock()
            .await
            .unsubscribe(channel)
            .await
            .with_context(|| format!("UNSUBSCRIBE {} failed", channel))
    }

    async fn punsubscribe(&self, pattern: &str) -> Result<()> {
        self.pubsub
            .lock()
            .await
            .punsubscribe(pattern)
            .await
            .with_context(|| format!("PUNSUBSCRIBE {} failed", pattern))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut publisher = self.publisher.clone();
        publisher
            .publish::<_, _, ()>(channel, payload)
            .await
            .with_context(|| format!("PUBLISH {} failed", channel))?;
        Ok(())
    }

    async fn get_message(&self, timeout: Duration) -> Result<Option<PubSubMessage>> {
        let mut pubsub = self.pubsub.lock().await;
        let mut stream = pubsub.on_message();
        let message = tokio::time::timeout(timeout, stream.next()).await;
        match message {
            Err(_) => Ok(None),
            Ok(None) => Ok(None),
            Ok(Some(message)) => {
                let channel = message.get_channel_name().to_string();
                // Plain messages carry no pattern; the parse fails and
                // maps to None.
                let pattern: Option<String> = message.get_pattern::<String>().ok();
                let payload: String = message
                    .get_payload()
                    .context("Non-text pub/sub payload")?;
                Ok(Some(PubSubMessage {
                    channel,
                    pattern,
                    payload,
                }))
            }
        }
    }
}
