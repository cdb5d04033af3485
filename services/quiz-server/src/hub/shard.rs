//! One shard: a dedicated coordination task owning its client map and room
//! registry, mutated only by messages it receives on its own inbound
//! channel — the same "one task owns the map, everyone else sends it
//! commands" shape as the teacher's `forwarder_command_senders` map, here
//! generalized from one sender-per-device to many clients per shard.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;
use crate::hub::rooms::RoomRegistry;
use crate::hub::session::EnqueueOutcome;
use crate::models::ClientSession;
use quiz_protocol::{ClusterEnvelope, ClusterTarget, Priority, ServerMessage};

pub enum ShardCommand {
    Register {
        session: ClientSession,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Unregister {
        client_id: Uuid,
    },
    SendDirect {
        client_id: Uuid,
        message: ServerMessage,
    },
    SendDirectToUser {
        user_id: Uuid,
        message: ServerMessage,
    },
    BroadcastRoom {
        quiz_id: Uuid,
        message: ServerMessage,
    },
    JoinRoom {
        client_id: Uuid,
        quiz_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    LeaveRoom {
        client_id: Uuid,
        quiz_id: Uuid,
    },
    ReceiveCluster {
        envelope: ClusterEnvelope,
    },
    RoomMemberCount {
        quiz_id: Uuid,
        reply: oneshot::Sender<usize>,
    },
    /// Room membership by `user_id`, not `client_id` (spec.md §4.6 step 5
    /// needs to match against `QuizRuntime`'s user-id-keyed `answered`/
    /// `eliminated` sets).
    RoomMemberUsers {
        quiz_id: Uuid,
        reply: oneshot::Sender<std::collections::HashSet<Uuid>>,
    },
}

pub struct Shard {
    id: usize,
    config: Config,
    instance_id: Uuid,
    clients: HashMap<Uuid, ClientSession>,
    rooms: RoomRegistry,
}

impl Shard {
    #[must_use]
    pub fn new(id: usize, config: Config, instance_id: Uuid) -> Self {
        Self { id, config, instance_id, clients: HashMap::new(), rooms: RoomRegistry::new() }
    }

    pub fn spawn(mut self, mut rx: mpsc::Receiver<ShardCommand>) {
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                self.handle(cmd).await;
            }
        });
    }

    async fn handle(&mut self, cmd: ShardCommand) {
        match cmd {
            ShardCommand::Register { session, reply } => {
                let result = self.register(session);
                let _ = reply.send(result);
            }
            ShardCommand::Unregister { client_id } => self.unregister(client_id),
            ShardCommand::SendDirect { client_id, message } => {
                self.send_direct(client_id, message).await;
            }
            ShardCommand::SendDirectToUser { user_id, message } => {
                if let Some(client_id) = self.find_client_for_user(user_id) {
                    self.send_direct(client_id, message).await;
                }
            }
            ShardCommand::BroadcastRoom { quiz_id, message } => {
                // Local enqueue only: `ShardedHub::broadcast_room` publishes the
                // cluster envelope exactly once, at the hub level, not here —
                // every shard runs this arm, and publishing per-shard would
                // multiply into `shard_count` copies on every other instance.
                self.broadcast_room_local(quiz_id, &message).await;
            }
            ShardCommand::JoinRoom { client_id, quiz_id, reply } => {
                let joined = if let Some(session) = self.clients.get_mut(&client_id) {
                    session.rooms.insert(quiz_id);
                    self.rooms.join(quiz_id, client_id);
                    true
                } else {
                    false
                };
                let _ = reply.send(joined);
            }
            ShardCommand::LeaveRoom { client_id, quiz_id } => {
                if let Some(session) = self.clients.get_mut(&client_id) {
                    session.rooms.remove(&quiz_id);
                }
                self.rooms.leave(quiz_id, client_id);
            }
            ShardCommand::ReceiveCluster { envelope } => {
                if envelope.origin_instance_id == self.instance_id {
                    return;
                }
                match envelope.target {
                    ClusterTarget::Broadcast | ClusterTarget::Room => {
                        if let Ok(quiz_id) = envelope.room_or_client.parse::<Uuid>() {
                            self.broadcast_room_local(quiz_id, &envelope.message).await;
                        }
                    }
                    ClusterTarget::Direct => {
                        if let Ok(client_id) = envelope.room_or_client.parse::<Uuid>() {
                            self.send_direct(client_id, envelope.message).await;
                        }
                    }
                    ClusterTarget::DirectUser => {
                        if let Ok(user_id) = envelope.room_or_client.parse::<Uuid>() {
                            if let Some(client_id) = self.find_client_for_user(user_id) {
                                self.send_direct(client_id, envelope.message).await;
                            }
                        }
                    }
                }
            }
            ShardCommand::RoomMemberCount { quiz_id, reply } => {
                let _ = reply.send(self.rooms.member_count(quiz_id));
            }
            ShardCommand::RoomMemberUsers { quiz_id, reply } => {
                let users = self
                    .rooms
                    .members(quiz_id)
                    .iter()
                    .filter_map(|client_id| self.clients.get(client_id).map(|s| s.user_id))
                    .collect();
                let _ = reply.send(users);
            }
        }
    }

    /// §4.2 `Register`.
    fn register(&mut self, session: ClientSession) -> Result<(), EngineError> {
        if self.clients.len() >= self.config.max_clients_per_shard {
            return Err(EngineError::TooManyConnections);
        }
        let client_id = session.client_id;
        for quiz_id in session.rooms.clone() {
            self.rooms.join(quiz_id, client_id);
        }
        self.clients.insert(client_id, session);
        info!(shard_id = self.id, client_id = %client_id, "client registered");
        Ok(())
    }

    /// §4.2 `Unregister`: idempotent.
    fn unregister(&mut self, client_id: Uuid) {
        if self.clients.remove(&client_id).is_some() {
            self.rooms.leave_all(client_id);
            info!(shard_id = self.id, client_id = %client_id, "client unregistered");
        }
    }

    /// Looks up which (if any) local connection belongs to `user_id`; shards
    /// key `clients` by `client_id`, so this is the one place that crosses
    /// from the user identity back to a connection.
    fn find_client_for_user(&self, user_id: Uuid) -> Option<Uuid> {
        self.clients.values().find(|s| s.user_id == user_id).map(|s| s.client_id)
    }

    /// §4.2 `SendDirect`: enqueue onto the client's priority queue; drop or
    /// disconnect per the back-pressure policy, never block the shard.
    async fn send_direct(&mut self, client_id: Uuid, message: ServerMessage) {
        let priority = message.priority();
        let Some(session) = self.clients.get(&client_id) else { return };
        let outcome = session.queues.enqueue(message, priority).await;
        if outcome == EnqueueOutcome::Disconnect {
            warn!(shard_id = self.id, client_id = %client_id, "slow consumer, disconnecting");
            self.unregister(client_id);
        }
    }

    /// §4.2 `BroadcastRoom`, local half: iterate room members on this
    /// instance and enqueue to each, preserving the priority of `message`.
    async fn broadcast_room_local(&mut self, quiz_id: Uuid, message: &ServerMessage) {
        let members = self.rooms.members(quiz_id);
        let mut slow: Vec<Uuid> = Vec::new();
        for client_id in members.iter() {
            if let Some(session) = self.clients.get(client_id) {
                let outcome = session.queues.enqueue(message.clone(), message.priority()).await;
                if outcome == EnqueueOutcome::Disconnect {
                    slow.push(*client_id);
                }
            }
        }
        for client_id in slow {
            warn!(shard_id = self.id, client_id = %client_id, "slow consumer during broadcast, disconnecting");
            self.unregister(client_id);
        }
    }

    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::session::PriorityQueues;
    use std::collections::HashSet;

    fn test_config() -> Config {
        Config {
            shard_count: 1,
            max_clients_per_shard: 2,
            client_queue_high: 4,
            client_queue_normal: 4,
            client_queue_low: 4,
            broadcast_buffer: 8,
            ping_interval: std::time::Duration::from_secs(30),
            pong_wait: std::time::Duration::from_secs(60),
            write_wait: std::time::Duration::from_secs(10),
            max_message_size: 65536,
            max_connections_per_ip: 100,
            access_ttl: std::time::Duration::from_secs(3600),
            refresh_ttl: std::time::Duration::from_secs(3600),
            ws_ticket_ttl: std::time::Duration::from_secs(30),
            max_refresh_per_user: 10,
            invalidation_retention: std::time::Duration::from_secs(3600),
            cleanup_interval: std::time::Duration::from_secs(1800),
            countdown_lead: std::time::Duration::from_secs(10),
            reconnect_grace: std::time::Duration::from_secs(15),
            answer_grace: std::time::Duration::from_millis(500),
            shutdown_grace: std::time::Duration::from_secs(10),
            jwt_secret: "test".to_owned(),
        }
    }

    fn session(client_id: Uuid) -> ClientSession {
        ClientSession {
            client_id,
            user_id: Uuid::new_v4(),
            queues: Arc::new(PriorityQueues::new(4, 4, 4)),
            rooms: HashSet::new(),
            last_pong: chrono::Utc::now(),
            eliminated_in: HashSet::new(),
        }
    }

    #[test]
    fn register_fails_with_too_many_connections_when_shard_is_full() {
        let mut shard = Shard::new(0, test_config(), Uuid::new_v4());
        shard.register(session(Uuid::new_v4())).unwrap();
        shard.register(session(Uuid::new_v4())).unwrap();
        let err = shard.register(session(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, EngineError::TooManyConnections));
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut shard = Shard::new(0, test_config(), Uuid::new_v4());
        let client_id = Uuid::new_v4();
        shard.register(session(client_id)).unwrap();
        shard.unregister(client_id);
        shard.unregister(client_id);
        assert_eq!(shard.client_count(), 0);
    }
}
