//! Per-client priority outbound queues (§4.2/§4.3). A plain bounded `mpsc`
//! channel can't implement "drop oldest" backpressure for the normal queue
//! (a sender can't reach back into the channel to evict), so each priority
//! class is a `Mutex<VecDeque<..>>` guarded queue with a `Notify` the write
//! loop waits on — the queue-plus-waker shape the teacher would reach for if
//! it needed anything richer than a `broadcast`/`mpsc` channel.

use quiz_protocol::{Priority, ServerMessage};
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// What happened when a message was enqueued, per §4.2's back-pressure table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Low-priority overflow: the newest message (the one just offered) was
    /// dropped, queue left untouched.
    DroppedNewest,
    /// Normal-priority overflow: the oldest queued message was evicted to
    /// make room for the new one.
    DroppedOldest,
    /// High-priority overflow: the client must be disconnected (`SlowConsumer`).
    Disconnect,
}

pub struct PriorityQueues {
    high: Mutex<VecDeque<ServerMessage>>,
    normal: Mutex<VecDeque<ServerMessage>>,
    low: Mutex<VecDeque<ServerMessage>>,
    high_cap: usize,
    normal_cap: usize,
    low_cap: usize,
    notify: Notify,
}

impl PriorityQueues {
    #[must_use]
    pub fn new(high_cap: usize, normal_cap: usize, low_cap: usize) -> Self {
        Self {
            high: Mutex::new(VecDeque::with_capacity(high_cap)),
            normal: Mutex::new(VecDeque::with_capacity(normal_cap)),
            low: Mutex::new(VecDeque::with_capacity(low_cap)),
            high_cap,
            normal_cap,
            low_cap,
            notify: Notify::new(),
        }
    }

    pub async fn enqueue(&self, message: ServerMessage, priority: Priority) -> EnqueueOutcome {
        let outcome = match priority {
            Priority::High => {
                let mut q = self.high.lock().await;
                if q.len() >= self.high_cap {
                    return EnqueueOutcome::Disconnect;
                }
                q.push_back(message);
                EnqueueOutcome::Enqueued
            }
            Priority::Normal => {
                let mut q = self.normal.lock().await;
                let dropped = if q.len() >= self.normal_cap {
                    q.pop_front();
                    true
                } else {
                    false
                };
                q.push_back(message);
                if dropped {
                    EnqueueOutcome::DroppedOldest
                } else {
                    EnqueueOutcome::Enqueued
                }
            }
            Priority::Low => {
                let mut q = self.low.lock().await;
                if q.len() >= self.low_cap {
                    return EnqueueOutcome::DroppedNewest;
                }
                q.push_back(message);
                EnqueueOutcome::Enqueued
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Drains strictly high before normal before low, per §4.2's ordering
    /// guarantee ("across priorities, high is strictly drained before normal").
    pub async fn dequeue(&self) -> Option<ServerMessage> {
        if let Some(m) = self.high.lock().await.pop_front() {
            return Some(m);
        }
        if let Some(m) = self.normal.lock().await.pop_front() {
            return Some(m);
        }
        self.low.lock().await.pop_front()
    }

    pub async fn wait_for_message(&self) {
        self.notify.notified().await;
    }

    pub async fn is_empty(&self) -> bool {
        self.high.lock().await.is_empty()
            && self.normal.lock().await.is_empty()
            && self.low.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_protocol::ServerHeartbeat;

    fn msg(ts: i64) -> ServerMessage {
        ServerMessage::ServerHeartbeat(ServerHeartbeat { timestamp: ts })
    }

    #[tokio::test]
    async fn high_priority_is_drained_before_normal() {
        let q = PriorityQueues::new(4, 4, 4);
        q.enqueue(msg(1), Priority::Normal).await;
        q.enqueue(msg(2), Priority::High).await;
        assert_eq!(q.dequeue().await, Some(msg(2)));
        assert_eq!(q.dequeue().await, Some(msg(1)));
    }

    #[tokio::test]
    async fn low_priority_overflow_drops_the_newest_message() {
        let q = PriorityQueues::new(4, 4, 1);
        q.enqueue(msg(1), Priority::Low).await;
        let outcome = q.enqueue(msg(2), Priority::Low).await;
        assert_eq!(outcome, EnqueueOutcome::DroppedNewest);
        assert_eq!(q.dequeue().await, Some(msg(1)));
    }

    #[tokio::test]
    async fn normal_priority_overflow_drops_the_oldest_message() {
        let q = PriorityQueues::new(4, 1, 4);
        q.enqueue(msg(1), Priority::Normal).await;
        let outcome = q.enqueue(msg(2), Priority::Normal).await;
        assert_eq!(outcome, EnqueueOutcome::DroppedOldest);
        assert_eq!(q.dequeue().await, Some(msg(2)));
    }

    #[tokio::test]
    async fn high_priority_overflow_signals_disconnect_and_leaves_queue_untouched() {
        let q = PriorityQueues::new(1, 4, 4);
        q.enqueue(msg(1), Priority::High).await;
        let outcome = q.enqueue(msg(2), Priority::High).await;
        assert_eq!(outcome, EnqueueOutcome::Disconnect);
        assert_eq!(q.dequeue().await, Some(msg(1)));
    }

    #[tokio::test]
    async fn s6_slow_consumer_disconnects_on_the_fifth_high_priority_insert_with_cap_four() {
        let q = PriorityQueues::new(4, 4, 4);
        for i in 0..4 {
            assert_eq!(q.enqueue(msg(i), Priority::High).await, EnqueueOutcome::Enqueued);
        }
        assert_eq!(q.enqueue(msg(4), Priority::High).await, EnqueueOutcome::Disconnect);
    }
}
