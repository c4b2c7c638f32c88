//! Non-queued event broadcaster: fans `LoopEvent`s out to every subscribed
//! ControlPlane connection. Subscribers that have gone away are dropped
//! silently; with zero subscribers an event is logged and discarded rather
//! than buffered for a client that may never connect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::domain::LoopEvent;

pub type SubscriberId = u64;

pub struct EventBroadcaster {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<LoopEvent>>>,
    next_id: AtomicU64,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Register a new subscriber, returning its id (for `unsubscribe`) and the
    /// receiving half of its event channel. The caller's connection task reads
    /// from the receiver and writes each event to the wire.
    pub async fn subscribe(&self) -> (SubscriberId, mpsc::UnboundedReceiver<LoopEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.insert(id, tx);
        debug!(id, "EventBroadcaster::subscribe: registered");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().await.remove(&id);
        debug!(id, "EventBroadcaster::unsubscribe: removed");
    }

    /// Broadcast `event` to every live subscriber. Dead channels (their
    /// receiver dropped, meaning the connection closed) are removed.
    pub async fn broadcast(&self, event: LoopEvent) -> usize {
        info!(loop_id = %event.loop_id, status = %event.status, "EventBroadcaster::broadcast: sending");

        let mut subscribers = self.subscribers.lock().await;
        if subscribers.is_empty() {
            debug!("EventBroadcaster::broadcast: no subscribers, event discarded");
            return 0;
        }

        let mut dead = Vec::new();
        let mut sent = 0usize;
        for (id, tx) in subscribers.iter() {
            if tx.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in &dead {
            subscribers.remove(id);
        }
        debug!(sent, removed = dead.len(), "EventBroadcaster::broadcast: done");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoopEventType, LoopStatus};

    fn sample_event() -> LoopEvent {
        LoopEvent {
            event_type: LoopEventType::LoopCompleted,
            loop_id: "loop-1".to_string(),
            task_name: "demo".to_string(),
            status: LoopStatus::Completed,
            iterations_used: 3,
            branch: "main".to_string(),
            final_story: Some("US-001".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_returns_zero() {
        let b = EventBroadcaster::new();
        assert_eq!(b.broadcast(sample_event()).await, 0);
    }

    #[tokio::test]
    async fn subscriber_receives_broadcast_event() {
        let b = EventBroadcaster::new();
        let (_id, mut rx) = b.subscribe().await;
        assert_eq!(b.broadcast(sample_event()).await, 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.loop_id, "loop-1");
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let b = EventBroadcaster::new();
        let (id, _rx) = b.subscribe().await;
        b.unsubscribe(id).await;
        assert_eq!(b.subscriber_count().await, 0);
        assert_eq!(b.broadcast(sample_event()).await, 0);
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_broadcast() {
        let b = EventBroadcaster::new();
        let (_id, rx) = b.subscribe().await;
        drop(rx);
        assert_eq!(b.broadcast(sample_event()).await, 0);
        assert_eq!(b.subscriber_count().await, 0);
    }
}
