pub mod rooms;
pub mod session;
pub mod shard;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::ClientSession;
use crate::pubsub::PubSub;
use quiz_protocol::{ClusterEnvelope, ClusterTarget, ServerMessage};
use shard::{Shard, ShardCommand};

/// The `AppState`-held handle: hashes `client_id` to a shard index and
/// forwards commands to that shard's sender, the same way
/// `AppState::get_or_create_broadcast` resolves work to the right
/// per-stream channel, generalized to N shards of many clients (C2).
#[derive(Clone)]
pub struct ShardedHub {
    senders: Arc<Vec<mpsc::Sender<ShardCommand>>>,
    pubsub: Arc<dyn PubSub>,
    instance_id: Uuid,
}

impl ShardedHub {
    #[must_use]
    pub fn spawn(config: Config, instance_id: Uuid, pubsub: Arc<dyn PubSub>) -> Self {
        let mut senders = Vec::with_capacity(config.shard_count);
        for id in 0..config.shard_count {
            let (tx, rx) = mpsc::channel(config.broadcast_buffer);
            Shard::new(id, config.clone(), instance_id).spawn(rx);
            senders.push(tx);
        }
        Self { senders: Arc::new(senders), pubsub, instance_id }
    }

    fn shard_for(&self, client_id: Uuid) -> &mpsc::Sender<ShardCommand> {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.senders.len();
        &self.senders[index]
    }

    pub async fn register(&self, session: ClientSession) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sender = self.shard_for(session.client_id).clone();
        sender
            .send(ShardCommand::Register { session, reply: reply_tx })
            .await
            .map_err(|_| EngineError::SchedulerBusy)?;
        reply_rx.await.map_err(|_| EngineError::SchedulerBusy)?
    }

    pub async fn unregister(&self, client_id: Uuid) {
        let _ = self.shard_for(client_id).send(ShardCommand::Unregister { client_id }).await;
    }

    /// Delivers to the one local connection `client_id` names, then
    /// publishes a single cluster envelope (C1) so any other instance
    /// holding that exact connection delivers it too (§4.1/§4.2).
    pub async fn send_direct(&self, client_id: Uuid, message: ServerMessage) {
        let _ = self
            .shard_for(client_id)
            .send(ShardCommand::SendDirect { client_id, message: message.clone() })
            .await;
        self.publish_once(ClusterTarget::Direct, client_id.to_string(), message).await;
    }

    /// Sends to whichever connection belongs to `user_id`, wherever its
    /// shard landed (shards are keyed by `client_id`, not `user_id`, so this
    /// fans out and lets the one shard holding that connection deliver it),
    /// then publishes a single cluster envelope (C1) so the instance holding
    /// that user's connection, if any, delivers it too (§4.1/§4.2).
    pub async fn send_direct_to_user(&self, user_id: Uuid, message: ServerMessage) {
        for sender in self.senders.iter() {
            let _ = sender.send(ShardCommand::SendDirectToUser { user_id, message: message.clone() }).await;
        }
        self.publish_once(ClusterTarget::DirectUser, user_id.to_string(), message).await;
    }

    /// Broadcasts to every shard (room membership is spread across shards by
    /// `client_id` hash, not by `quiz_id`), then publishes exactly one
    /// cluster envelope (C1) — not one per shard, which would otherwise
    /// multiply into `shard_count` copies on every other instance (§4.2,
    /// scenario S5).
    pub async fn broadcast_room(&self, quiz_id: Uuid, message: ServerMessage) {
        for sender in self.senders.iter() {
            let _ = sender
                .send(ShardCommand::BroadcastRoom { quiz_id, message: message.clone() })
                .await;
        }
        self.publish_once(ClusterTarget::Room, quiz_id.to_string(), message).await;
    }

    async fn publish_once(&self, target: ClusterTarget, room_or_client: String, message: ServerMessage) {
        let channel = match target {
            ClusterTarget::Direct | ClusterTarget::DirectUser => crate::pubsub::CHANNEL_DIRECT,
            ClusterTarget::Broadcast | ClusterTarget::Room => crate::pubsub::CHANNEL_BROADCAST,
        };
        let envelope = ClusterEnvelope { origin_instance_id: self.instance_id, target, room_or_client, message };
        self.pubsub.publish(channel, &envelope).await;
    }

    pub async fn join_room(&self, client_id: Uuid, quiz_id: Uuid) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self
            .shard_for(client_id)
            .send(ShardCommand::JoinRoom { client_id, quiz_id, reply: reply_tx })
            .await;
        if sent.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    pub async fn leave_room(&self, client_id: Uuid, quiz_id: Uuid) {
        let _ = self.shard_for(client_id).send(ShardCommand::LeaveRoom { client_id, quiz_id }).await;
    }

    pub async fn receive_cluster(&self, envelope: ClusterEnvelope) {
        for sender in self.senders.iter() {
            let _ = sender.send(ShardCommand::ReceiveCluster { envelope: envelope.clone() }).await;
        }
    }

    /// Sums room membership across shards (membership for one `quiz_id` is
    /// scattered across shards because sharding keys on `client_id`).
    pub async fn room_member_count(&self, quiz_id: Uuid) -> usize {
        let mut total = 0;
        for sender in self.senders.iter() {
            let (reply_tx, reply_rx) = oneshot::channel();
            if sender.send(ShardCommand::RoomMemberCount { quiz_id, reply: reply_tx }).await.is_ok() {
                total += reply_rx.await.unwrap_or(0);
            }
        }
        total
    }

    /// Unions room membership across all shards into one snapshot of
    /// `user_id`s, for the elimination sweep at answer-window close (§4.6
    /// step 5), which needs to match against `QuizRuntime`'s user-id-keyed
    /// `answered` set rather than the shard-local `client_id`s.
    pub async fn room_members(&self, quiz_id: Uuid) -> std::collections::HashSet<Uuid> {
        let mut all = std::collections::HashSet::new();
        for sender in self.senders.iter() {
            let (reply_tx, reply_rx) = oneshot::channel();
            if sender.send(ShardCommand::RoomMemberUsers { quiz_id, reply: reply_tx }).await.is_ok() {
                if let Ok(members) = reply_rx.await {
                    all.extend(members);
                }
            }
        }
        all
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::session::PriorityQueues;
    use crate::pubsub::LocalPubSub;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            shard_count: 4,
            max_clients_per_shard: 5000,
            client_queue_high: 256,
            client_queue_normal: 128,
            client_queue_low: 64,
            broadcast_buffer: 128,
            ping_interval: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: 65536,
            max_connections_per_ip: 100,
            access_ttl: Duration::from_secs(3600),
            refresh_ttl: Duration::from_secs(3600),
            ws_ticket_ttl: Duration::from_secs(30),
            max_refresh_per_user: 10,
            invalidation_retention: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(1800),
            countdown_lead: Duration::from_secs(10),
            reconnect_grace: Duration::from_secs(15),
            answer_grace: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(10),
            jwt_secret: "test".to_owned(),
        }
    }

    fn session(client_id: Uuid, quiz_id: Uuid) -> ClientSession {
        let mut rooms = HashSet::new();
        rooms.insert(quiz_id);
        ClientSession {
            client_id,
            user_id: Uuid::new_v4(),
            queues: Arc::new(PriorityQueues::new(256, 128, 64)),
            rooms,
            last_pong: chrono::Utc::now(),
            eliminated_in: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn register_unregister_is_identity_for_membership() {
        let hub = ShardedHub::spawn(test_config(), Uuid::new_v4(), Arc::new(LocalPubSub));
        let quiz_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();

        hub.register(session(client_id, quiz_id)).await.unwrap();
        assert_eq!(hub.room_member_count(quiz_id).await, 1);

        hub.unregister(client_id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hub.room_member_count(quiz_id).await, 0);
    }

    #[tokio::test]
    async fn join_room_adds_membership_for_a_registered_client() {
        let hub = ShardedHub::spawn(test_config(), Uuid::new_v4(), Arc::new(LocalPubSub));
        let client_id = Uuid::new_v4();
        let quiz_id = Uuid::new_v4();

        hub.register(session(client_id, Uuid::new_v4())).await.unwrap();
        assert!(hub.join_room(client_id, quiz_id).await);
        assert_eq!(hub.room_member_count(quiz_id).await, 1);
    }

    #[tokio::test]
    async fn room_members_reports_user_ids_not_client_ids() {
        let hub = ShardedHub::spawn(test_config(), Uuid::new_v4(), Arc::new(LocalPubSub));
        let quiz_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let sess = session(client_id, quiz_id);
        let user_id = sess.user_id;

        hub.register(sess).await.unwrap();
        let members = hub.room_members(quiz_id).await;
        assert!(members.contains(&user_id));
        assert!(!members.contains(&client_id));
    }

    #[tokio::test]
    async fn send_direct_to_user_reaches_the_connection_for_that_user_id() {
        let hub = ShardedHub::spawn(test_config(), Uuid::new_v4(), Arc::new(LocalPubSub));
        let quiz_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();
        let sess = session(client_id, quiz_id);
        let user_id = sess.user_id;
        let queues = sess.queues.clone();
        hub.register(sess).await.unwrap();

        hub.send_direct_to_user(user_id, ServerMessage::QuizFinish(quiz_protocol::QuizFinish { quiz_id })).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queues.dequeue().await.is_some());
    }

    /// A `PubSub` spy that only counts publishes, for the "exactly one
    /// cluster envelope per logical broadcast" invariant (§4.2, scenario S5)
    /// — every shard runs the `BroadcastRoom` command, so a naive
    /// per-shard publish would multiply into `shard_count` copies.
    struct CountingPubSub(std::sync::atomic::AtomicUsize);

    #[async_trait::async_trait]
    impl crate::pubsub::PubSub for CountingPubSub {
        async fn publish(&self, _channel: &str, _envelope: &ClusterEnvelope) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        async fn subscribe(&self, _channel: &str) -> mpsc::Receiver<ClusterEnvelope> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
        async fn close(&self) {}
    }

    #[tokio::test]
    async fn broadcast_room_publishes_the_cluster_envelope_exactly_once() {
        let pubsub = Arc::new(CountingPubSub(std::sync::atomic::AtomicUsize::new(0)));
        let hub = ShardedHub::spawn(test_config(), Uuid::new_v4(), pubsub.clone());
        let quiz_id = Uuid::new_v4();

        hub.broadcast_room(quiz_id, ServerMessage::QuizFinish(quiz_protocol::QuizFinish { quiz_id })).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pubsub.0.load(std::sync::atomic::Ordering::SeqCst), 1, "shard_count={}", hub.shard_count());
    }

    #[tokio::test]
    async fn send_direct_to_user_publishes_the_cluster_envelope_exactly_once() {
        let pubsub = Arc::new(CountingPubSub(std::sync::atomic::AtomicUsize::new(0)));
        let hub = ShardedHub::spawn(test_config(), Uuid::new_v4(), pubsub.clone());
        let user_id = Uuid::new_v4();

        hub.send_direct_to_user(user_id, ServerMessage::QuizFinish(quiz_protocol::QuizFinish { quiz_id: Uuid::new_v4() }))
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pubsub.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
