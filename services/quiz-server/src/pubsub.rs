//! Pub/Sub Adapter (C1): pluggable cross-instance fan-out. A `PubSub` trait
//! held as `Arc<dyn PubSub>` in `AppState`, mirroring how `AppState` in the
//! teacher holds `Arc<RwLock<...>>` registries rather than a concrete type.
//! Two implementations: `LocalPubSub` (single-instance no-op) and
//! `RedisPubSub` (broker-backed, §4.1's durable `ws:broadcast`/`ws:direct`
//! channels), using the `redis` crate's async `ConnectionManager` — sourced
//! from the broker-backed examples in the wider retrieval pack, since the
//! teacher itself has no pub/sub broker dependency.

use async_trait::async_trait;
use futures_util::StreamExt;
use quiz_protocol::ClusterEnvelope;
use tokio::sync::mpsc;
use tracing::{error, warn};

pub const CHANNEL_BROADCAST: &str = "ws:broadcast";
pub const CHANNEL_DIRECT: &str = "ws:direct";
pub const CHANNEL_METRICS: &str = "ws:metrics";

#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, envelope: &ClusterEnvelope);
    /// Returns a receiver fed by a background task for every message seen on
    /// `channel`; dropping the receiver stops the subscription's deliveries
    /// to this particular caller (the background fan-out itself persists).
    async fn subscribe(&self, channel: &str) -> mpsc::Receiver<ClusterEnvelope>;
    async fn close(&self);
}

/// Single-instance deployments: publish is a no-op, subscribe yields nothing.
pub struct LocalPubSub;

#[async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, _channel: &str, _envelope: &ClusterEnvelope) {}

    async fn subscribe(&self, _channel: &str) -> mpsc::Receiver<ClusterEnvelope> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }

    async fn close(&self) {}
}

pub struct RedisPubSub {
    client: redis::Client,
    manager: redis::aio::ConnectionManager,
}

impl RedisPubSub {
    pub async fn connect(redis_url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, envelope: &ClusterEnvelope) {
        let Ok(payload) = serde_json::to_string(envelope) else {
            error!(channel, "failed to serialize cluster envelope");
            return;
        };
        let mut conn = self.manager.clone();
        if let Err(e) = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
        {
            warn!(channel, error = %e, "redis publish failed");
        }
    }

    async fn subscribe(&self, channel: &str) -> mpsc::Receiver<ClusterEnvelope> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let channel = channel.to_owned();

        tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "failed to open redis pubsub connection");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                error!(channel = %channel, error = %e, "failed to subscribe to redis channel");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload): Result<String, _> = msg.get_payload() else {
                    continue;
                };
                match serde_json::from_str::<ClusterEnvelope>(&payload) {
                    Ok(envelope) => {
                        if tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed cluster envelope"),
                }
            }
        });

        rx
    }

    async fn close(&self) {
        let mut conn = self.manager.clone();
        let _: Result<(), _> = redis::cmd("UNSUBSCRIBE").query_async::<()>(&mut conn).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_protocol::{ClusterTarget, ServerMessage};
    use uuid::Uuid;

    #[tokio::test]
    async fn local_pubsub_publish_is_a_noop_and_subscribe_yields_nothing() {
        let pubsub = LocalPubSub;
        let envelope = ClusterEnvelope {
            origin_instance_id: Uuid::new_v4(),
            target: ClusterTarget::Broadcast,
            room_or_client: String::new(),
            message: ServerMessage::ServerHeartbeat(quiz_protocol::ServerHeartbeat { timestamp: 0 }),
        };
        pubsub.publish(CHANNEL_BROADCAST, &envelope).await;

        let mut rx = pubsub.subscribe(CHANNEL_BROADCAST).await;
        assert!(rx.try_recv().is_err());
    }
}
