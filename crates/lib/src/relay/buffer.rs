//! Per-cycle event buffer: latest version of each message, keyed by id.

use crate::channels::{sender_key, InboundEvent};
use std::collections::BTreeMap;

/// Absorbs new/edited message events for one cycle. At most one entry per id.
#[derive(Debug)]
pub struct EventBuffer {
    sender: String,
    events: BTreeMap<i64, InboundEvent>,
}

impl EventBuffer {
    pub fn new(sender: &str) -> Self {
        Self {
            sender: sender_key(sender),
            events: BTreeMap::new(),
        }
    }

    /// Record an event from the expected sender. Returns false when it was ignored:
    /// wrong sender, or an older observation of a message already held.
    ///
    /// The version with the latest `observed_at` wins regardless of arrival order.
    /// On a tie the later arrival wins, except that an unedited observation never
    /// replaces an edited one (message timestamps only have second resolution).
    pub fn record(&mut self, event: InboundEvent) -> bool {
        if event.sender != self.sender {
            return false;
        }
        if let Some(held) = self.events.get(&event.id) {
            let stale = event.observed_at < held.observed_at
                || (event.observed_at == held.observed_at && held.is_edit && !event.is_edit);
            if stale {
                log::debug!("relay: dropping stale observation of message {}", event.id);
                return false;
            }
        }
        self.events.insert(event.id, event);
        true
    }

    /// Current events ordered by ascending id.
    pub fn snapshot(&self) -> Vec<&InboundEvent> {
        self.events.values().collect()
    }

    /// Consume the buffer, yielding events ordered by ascending id.
    pub fn into_events(self) -> Vec<InboundEvent> {
        self.events.into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
