//! Correlation window: decides when the remote agent's answer has settled.
//!
//! Two phases: wait up to `initial_timeout` for any event at all, then keep
//! absorbing events until `settle_timeout` passes with nothing new recorded.

use crate::channels::{EventBus, InboundEvent, Subscription, SubscriptionToken};
use crate::relay::buffer::EventBuffer;
use crate::relay::error::RelayError;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

/// Timeouts for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTimings {
    pub initial_timeout: Duration,
    pub settle_timeout: Duration,
}

impl WindowTimings {
    pub const fn new(initial_timeout: Duration, settle_timeout: Duration) -> Self {
        Self {
            initial_timeout,
            settle_timeout,
        }
    }
}

/// A subscription plus the buffer it feeds, owned by exactly one cycle.
///
/// Open it *before* triggering the remote agent so no reply is missed. The
/// subscription is released when the window is dropped: after settlement,
/// on failure, or when the awaiting future is cancelled.
pub struct CorrelationWindow {
    subscription: Subscription,
    buffer: EventBuffer,
}

impl CorrelationWindow {
    pub fn open(bus: &EventBus, sender: &str) -> Self {
        Self {
            subscription: bus.subscribe(sender),
            buffer: EventBuffer::new(sender),
        }
    }

    pub fn token(&self) -> SubscriptionToken {
        self.subscription.token()
    }

    /// Suspend until the event set has settled; returns it ordered by ascending id.
    ///
    /// Fails with [`RelayError::NoResponse`] when nothing is recorded within the initial timeout.
    pub async fn await_settlement(
        mut self,
        timings: WindowTimings,
    ) -> Result<Vec<InboundEvent>, RelayError> {
        let deadline = Instant::now() + timings.initial_timeout;
        while self.buffer.is_empty() {
            match timeout_at(deadline, self.subscription.recv()).await {
                Ok(Some(event)) if Instant::now() < deadline => {
                    self.buffer.record(event);
                }
                Ok(None) => return Err(RelayError::Transport("event stream closed".to_string())),
                Ok(Some(_)) | Err(_) => {
                    log::debug!(
                        "relay: no event within {:?} on {}",
                        timings.initial_timeout,
                        self.token()
                    );
                    return Err(RelayError::NoResponse);
                }
            }
        }

        let mut quiet_until = Instant::now() + timings.settle_timeout;
        loop {
            match timeout_at(quiet_until, self.subscription.recv()).await {
                Ok(Some(event)) => {
                    if self.buffer.record(event) {
                        quiet_until = Instant::now() + timings.settle_timeout;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        log::debug!(
            "relay: settled with {} message(s) on {}",
            self.buffer.len(),
            self.token()
        );
        Ok(self.buffer.into_events())
    }
}
