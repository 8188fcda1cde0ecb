//! Event bus: one demultiplexed stream of inbound events, fanned out to request-scoped subscriptions.
//!
//! The channel connector publishes every observed message here. Each relay cycle
//! holds its own [`Subscription`]; dropping it unregisters the cycle, on every exit path.

use crate::channels::inbound::{sender_key, InboundEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;

/// Opaque token identifying one subscription on the bus.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct SubscriptionToken(uuid::Uuid);

impl std::fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscriber {
    sender: String,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

type Subscribers = Mutex<HashMap<SubscriptionToken, Subscriber>>;

fn lock(subscribers: &Subscribers) -> MutexGuard<'_, HashMap<SubscriptionToken, Subscriber>> {
    subscribers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared across the gateway; the channel publishes, relay cycles subscribe.
pub struct EventBus {
    inner: Arc<Subscribers>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register interest in messages from `sender`. Events published before this call are not replayed.
    pub fn subscribe(&self, sender: &str) -> Subscription {
        let token = SubscriptionToken(uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner).insert(
            token,
            Subscriber {
                sender: sender_key(sender),
                tx,
            },
        );
        log::debug!("bus: subscription {} acquired for {}", token, sender);
        Subscription {
            token,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every subscription for its sender. Returns how many received it.
    pub fn publish(&self, event: InboundEvent) -> usize {
        let g = lock(&self.inner);
        let mut delivered = 0;
        for sub in g.values().filter(|s| s.sender == event.sender) {
            if sub.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            log::debug!("bus: no subscriber for message {} from {}", event.id, event.sender);
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).len()
    }
}

/// A request-scoped handle into the bus. Unregisters itself on drop.
pub struct Subscription {
    token: SubscriptionToken,
    rx: mpsc::UnboundedReceiver<InboundEvent>,
    bus: Weak<Subscribers>,
}

impl Subscription {
    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Next event for this subscription; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus).remove(&self.token);
            log::debug!("bus: subscription {} released", self.token);
        }
    }
}
