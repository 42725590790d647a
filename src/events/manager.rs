use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use super::notification::{ControllerId, Event, EventMask};

/// Default depth of each controller's event queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Sending side of a controller's event queue.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    id: ControllerId,
    name: Arc<str>,
    tx: mpsc::Sender<Event>,
}

impl ControllerHandle {
    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
struct Subscriber {
    mask: EventMask,
    handle: ControllerHandle,
}

/// Publish/subscribe bus between controllers.
///
/// Each controller owns a bounded queue (its mailbox). Posting only enqueues
/// and never waits: a full queue drops the event for that subscriber. Event
/// handlers always run on the receiving controller's own task, never on the
/// poster's.
#[derive(Debug)]
pub struct EventManager {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU32,
    queue_depth: usize,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl EventManager {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU32::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Subscriber>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Subscriber>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a mailbox for a controller.
    pub fn mailbox(&self, name: &str) -> (ControllerHandle, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = ControllerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = ControllerHandle {
            id,
            name: Arc::from(name),
            tx,
        };
        (handle, rx)
    }

    /// Register interest; subscribing twice widens the existing mask.
    pub fn subscribe(&self, mask: EventMask, handle: &ControllerHandle) {
        let mut subscribers = self.write();

        if let Some(existing) = subscribers.iter_mut().find(|s| s.handle.id == handle.id) {
            existing.mask |= mask;
        } else {
            subscribers.push(Subscriber {
                mask,
                handle: handle.clone(),
            });
        }

        debug!(controller = %handle.name, id = %handle.id, ?mask, "subscribed");
    }

    /// Queue `event` for every matching subscriber; returns how many got it.
    ///
    /// A subscriber matches when its mask contains the notification and,
    /// for directed events, it is the target.
    pub fn post_event(&self, event: impl Into<Event>) -> usize {
        let event = event.into();
        let subscribers = self.read();
        let mut delivered = 0;

        for sub in subscribers.iter() {
            if event.target.is_some_and(|target| target != sub.handle.id) {
                continue;
            }
            if !sub.mask.contains(&event.notification) {
                continue;
            }

            match sub.handle.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(controller = %sub.handle.name, notification = ?event.notification, "event queue full, dropping");
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(controller = %sub.handle.name, "controller gone");
                }
            }
        }

        trace!(notification = ?event.notification, delivered, "event posted");
        delivered
    }

    /// Whether events are waiting in the controller's queue.
    pub fn has_pending_events(&self, handle: &ControllerHandle) -> bool {
        handle.tx.capacity() < handle.tx.max_capacity()
    }

    pub fn subscriber_count(&self) -> usize {
        self.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::notification::{Notification, SystemNotification};

    #[test]
    fn directed_event_reaches_only_target() {
        let bus = EventManager::default();
        let (a, mut rx_a) = bus.mailbox("a");
        let (b, mut rx_b) = bus.mailbox("b");
        bus.subscribe(EventMask::user(1), &a);
        bus.subscribe(EventMask::user(1), &b);

        assert_eq!(bus.post_event(Event::user(1).to(b.id())), 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().notification, Notification::User(1));
    }

    #[test]
    fn resubscribe_widens_mask() {
        let bus = EventManager::default();
        let (a, _rx) = bus.mailbox("a");
        bus.subscribe(EventMask::user(1), &a);
        bus.subscribe(SystemNotification::NetworkReady.into(), &a);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.post_event(SystemNotification::NetworkReady), 1);
        assert_eq!(bus.post_event(Event::user(1)), 1);
        assert!(bus.has_pending_events(&a));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let bus = EventManager::new(1);
        let (a, _rx) = bus.mailbox("a");
        bus.subscribe(EventMask::user(2), &a);

        assert_eq!(bus.post_event(Event::user(2)), 1);
        assert_eq!(bus.post_event(Event::user(2)), 0);
    }
}
