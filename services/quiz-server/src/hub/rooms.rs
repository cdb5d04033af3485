//! Room Registry (C8): `quiz_id -> {client_id}` membership, held per-shard
//! with copy-on-write semantics — reads take an `Arc` snapshot of a room's
//! member set rather than holding a lock across the broadcast loop, so a
//! slow or large broadcast never blocks a concurrent join/leave.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::ClientId;

#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<Uuid, Arc<HashSet<ClientId>>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, quiz_id: Uuid, client_id: ClientId) {
        let current = self.rooms.get(&quiz_id).cloned().unwrap_or_default();
        if current.contains(&client_id) {
            return;
        }
        let mut next = (*current).clone();
        next.insert(client_id);
        self.rooms.insert(quiz_id, Arc::new(next));
    }

    pub fn leave(&mut self, quiz_id: Uuid, client_id: ClientId) {
        let Some(current) = self.rooms.get(&quiz_id) else { return };
        if !current.contains(&client_id) {
            return;
        }
        let mut next = (**current).clone();
        next.remove(&client_id);
        if next.is_empty() {
            self.rooms.remove(&quiz_id);
        } else {
            self.rooms.insert(quiz_id, Arc::new(next));
        }
    }

    /// Removes a client from every room it belongs to (disconnect path).
    pub fn leave_all(&mut self, client_id: ClientId) {
        let quiz_ids: Vec<Uuid> = self.rooms.keys().copied().collect();
        for quiz_id in quiz_ids {
            self.leave(quiz_id, client_id);
        }
    }

    /// A cheap, lock-free-to-read snapshot of the room's membership at this
    /// instant; safe to iterate while other tasks continue to join/leave.
    #[must_use]
    pub fn members(&self, quiz_id: Uuid) -> Arc<HashSet<ClientId>> {
        self.rooms.get(&quiz_id).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn member_count(&self, quiz_id: Uuid) -> usize {
        self.rooms.get(&quiz_id).map_or(0, |m| m.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_leave_restores_empty_membership() {
        let mut registry = RoomRegistry::new();
        let quiz_id = Uuid::new_v4();
        let client_id = Uuid::new_v4();

        registry.join(quiz_id, client_id);
        assert_eq!(registry.member_count(quiz_id), 1);

        registry.leave(quiz_id, client_id);
        assert_eq!(registry.member_count(quiz_id), 0);
    }

    #[test]
    fn leave_all_removes_client_from_every_room() {
        let mut registry = RoomRegistry::new();
        let client_id = Uuid::new_v4();
        let quiz_a = Uuid::new_v4();
        let quiz_b = Uuid::new_v4();

        registry.join(quiz_a, client_id);
        registry.join(quiz_b, client_id);
        registry.leave_all(client_id);

        assert_eq!(registry.member_count(quiz_a), 0);
        assert_eq!(registry.member_count(quiz_b), 0);
    }

    #[test]
    fn snapshot_is_unaffected_by_a_later_join() {
        let mut registry = RoomRegistry::new();
        let quiz_id = Uuid::new_v4();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();

        registry.join(quiz_id, c1);
        let snapshot = registry.members(quiz_id);
        registry.join(quiz_id, c2);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.member_count(quiz_id), 2);
    }
}
