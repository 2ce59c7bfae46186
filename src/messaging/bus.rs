/// Notification bus
///
/// Broadcasts controller notifications to any number of observers.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

use super::events::Notification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

struct Subscriber {
    id: SubscriberId,
    sender: Sender<Notification>,
}

#[derive(Clone, Default)]
pub struct NotificationBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicUsize>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe, returns a receiver and subscription ID
    pub fn subscribe(&self) -> (Receiver<Notification>, SubscriberId) {
        let (tx, rx) = unbounded();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, sender: tx });
        (rx, id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Send to every subscriber. Subscribers whose receiver is gone are dropped.
    pub fn publish(&self, notification: Notification) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                if subscriber.sender.send(notification.clone()).is_err() {
                    closed.push(subscriber.id);
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers.write().retain(|s| !closed.contains(&s.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::SearchCycle;

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let bus = NotificationBus::new();
        let (_rx, id) = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(id);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let bus = NotificationBus::new();
        let (rx1, _id1) = bus.subscribe();
        let (rx2, _id2) = bus.subscribe();

        bus.publish(Notification::UploadFailed {
            cycle: SearchCycle(3),
            reason: "timeout".into(),
        });

        for rx in [rx1, rx2] {
            match rx.try_recv().unwrap() {
                Notification::UploadFailed { cycle, .. } => assert_eq!(cycle, SearchCycle(3)),
                other => panic!("Wrong notification received: {:?}", other),
            }
        }
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let bus = NotificationBus::new();
        let (rx, _id) = bus.subscribe();
        let (_kept, _id2) = bus.subscribe();
        drop(rx);

        bus.publish(Notification::Shutdown);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_clone_shares_subscribers() {
        let bus1 = NotificationBus::new();
        let bus2 = bus1.clone();

        let (_rx, _id) = bus1.subscribe();
        assert_eq!(bus2.subscriber_count(), 1);
    }
}
