//! Event Bus (§4.7): one bounded, unified, tagged channel. Producers are
//! the threshold evaluator, anomaly engine and composite rule evaluator;
//! the notification dispatcher is the sole consumer. FIFO per producer;
//! no cross-category ordering is promised.

use std::collections::VecDeque;
use std::sync::Arc;

use serversentry_core::Event;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

const DEFAULT_CAPACITY: usize = 1024;

struct Inner {
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
}

/// A bounded, cloneable handle to the event bus. All clones share the
/// same underlying queue.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Arc::new(Inner { capacity, queue: Mutex::new(VecDeque::with_capacity(capacity)), notify: Notify::new() }) }
    }

    /// Publishes `event`. When the bus is full, drops the oldest queued
    /// event that is not itself a recovery or critical, preferring to
    /// keep those; if every queued event is important, drops the
    /// actual-oldest one rather than blocking the producer.
    pub async fn publish(&self, event: Event) {
        let mut queue = self.inner.queue.lock().await;
        if queue.len() >= self.inner.capacity {
            let drop_at = queue.iter().position(|e| !e.is_recovery_or_critical()).unwrap_or(0);
            if let Some(dropped) = queue.remove(drop_at) {
                warn!(dropped_timestamp = dropped.timestamp(), "event bus full, dropped oldest queued event");
            }
        }
        queue.push_back(event);
        drop(queue);
        self.inner.notify.notify_one();
    }

    /// Waits for and removes the next event, FIFO.
    pub async fn recv(&self) -> Event {
        loop {
            {
                let mut queue = self.inner.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return event;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv), for drain-on-shutdown.
    pub async fn try_recv(&self) -> Option<Event> {
        self.inner.queue.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serversentry_core::Status;

    fn status_event(status: Status, timestamp: i64) -> Event {
        Event::Status {
            plugin: "cpu".into(),
            metric: "usage".into(),
            value: 10.0,
            status,
            warning_threshold: None,
            critical_threshold: None,
            timestamp,
        }
    }

    #[tokio::test]
    async fn publish_and_recv_is_fifo() {
        let bus = EventBus::new(10);
        bus.publish(status_event(Status::Ok, 1)).await;
        bus.publish(status_event(Status::Warning, 2)).await;

        assert_eq!(bus.recv().await.timestamp(), 1);
        assert_eq!(bus.recv().await.timestamp(), 2);
    }

    #[tokio::test]
    async fn full_bus_drops_oldest_non_critical_first() {
        let bus = EventBus::new(2);
        bus.publish(status_event(Status::Critical, 1)).await;
        bus.publish(status_event(Status::Ok, 2)).await;
        bus.publish(status_event(Status::Warning, 3)).await;

        assert_eq!(bus.len().await, 2);
        let first = bus.recv().await;
        assert_eq!(first.timestamp(), 1, "critical event must survive eviction");
    }

    #[tokio::test]
    async fn try_recv_returns_none_on_empty_queue() {
        let bus = EventBus::new(4);
        assert!(bus.try_recv().await.is_none());
    }
}
