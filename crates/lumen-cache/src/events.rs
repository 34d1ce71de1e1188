//! Cache event channels.
//!
//! Every cache manager publishes key lifecycle events to its
//! subscribers. Delivery is synchronous and ordered per manager
//! instance: `publish` sends to each subscriber before returning.

use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use lumen_block::BlockHash;

/// Observable key lifecycle events of a cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    KeyAdded(BlockHash),
    KeyExpired(BlockHash),
    KeyRemoved(BlockHash),
    CacheMiss(BlockHash),
}

/// Fan-out publisher backing a cache manager's event channels.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<CacheEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Send `event` to every live subscriber, dropping disconnected ones.
    pub fn publish(&self, event: CacheEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|tx| tx.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers_in_order() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        let a = BlockHash::compute(b"a");
        let b = BlockHash::compute(b"b");
        bus.publish(CacheEvent::KeyAdded(a));
        bus.publish(CacheEvent::KeyRemoved(b));

        for rx in [rx1, rx2] {
            assert_eq!(rx.try_recv().unwrap(), CacheEvent::KeyAdded(a));
            assert_eq!(rx.try_recv().unwrap(), CacheEvent::KeyRemoved(b));
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        // Must not error or grow the subscriber list forever.
        bus.publish(CacheEvent::CacheMiss(BlockHash::compute(b"x")));
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
