//! Topic-keyed publish/subscribe fan-out.
//!
//! Generalizes a fixed per-kind listener vector approach
//! (`state.rs`'s `queue_listeners: Mutex<Vec<Arc<dyn Fn(QueueState) + Send
//! + Sync>>>`, notified by `notify_queue_listeners`) into a single
//! `HashMap<topic, Vec<listener>>` keyed by [`crate::domain::Event::topic`],
//! since there are four event shapes fanned out over three topics
//! instead of one fixed snapshot type.
//!
//! Delivery is bounded and non-blocking: each subscriber gets its own
//! worker thread draining a small bounded channel, and `publish` only ever
//! does a non-blocking `try_send` into it. A subscriber that cannot keep up
//! has events dropped for it rather than stalling the publisher or other
//! subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex};

use crate::domain::Event;
use crate::sync_ext::MutexExt;

/// Events queued per subscriber before `publish` starts dropping them for
/// that subscriber instead of blocking.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

struct ListenerEntry {
    id: u64,
    sender: mpsc::SyncSender<Event>,
}

type Listeners = Arc<Mutex<HashMap<&'static str, Vec<ListenerEntry>>>>;

pub struct EventBus {
    listeners: Listeners,
    next_subscriber_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(1),
        }
    }
}

/// Handle returned by [`EventBus::subscribe_topic`]. Dropping it leaves the
/// subscription active — call [`Subscription::unsubscribe`] explicitly to
/// cancel it, since most callers discard the handle immediately and an
/// implicit drop-to-unsubscribe would silently cancel every such
/// subscription right after registration.
pub struct Subscription {
    topic: &'static str,
    id: u64,
    listeners: Listeners,
}

impl Subscription {
    /// Cancels this subscription: the bus stops delivering to it, and its
    /// worker thread exits once its queue drains.
    pub fn unsubscribe(self) {
        let mut guard = self.listeners.lock_unpoisoned();
        if let Some(entries) = guard.get_mut(self.topic) {
            entries.retain(|entry| entry.id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Registers `listener` under `topic`, spawning a dedicated worker
    /// thread that drains its bounded channel and invokes `listener` for
    /// each event in arrival order.
    pub fn subscribe_topic(
        &self,
        topic: &'static str,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let (sender, receiver) = mpsc::sync_channel::<Event>(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                listener(&event);
            }
        });

        self.listeners
            .lock_unpoisoned()
            .entry(topic)
            .or_default()
            .push(ListenerEntry { id, sender });

        Subscription {
            topic,
            id,
            listeners: self.listeners.clone(),
        }
    }

    /// Publishes `event` to every subscriber of its topic. Never blocks: a
    /// subscriber whose queue is full simply misses this event.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let senders: Vec<mpsc::SyncSender<Event>> = {
            let guard = self.listeners.lock_unpoisoned();
            guard
                .get(topic)
                .map(|entries| entries.iter().map(|entry| entry.sender.clone()).collect())
                .unwrap_or_default()
        };
        for sender in &senders {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    crate::debug_eprintln!("event_bus: subscriber queue full for topic {topic}, dropping event");
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.listeners
            .lock_unpoisoned()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
