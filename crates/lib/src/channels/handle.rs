//! Handle to the remote agent's conversation: the primitives a relay cycle drives.

use crate::channels::inbound::{Button, InboundEvent};
use async_trait::async_trait;

/// Connection to the remote agent. Constructed once at startup and shared by reference.
///
/// Inbound messages do not come back through this trait; the connector publishes
/// them to the [`EventBus`](crate::channels::EventBus).
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;
    /// Identity of the remote agent; matches [`InboundEvent::sender`] of its messages.
    fn target(&self) -> &str;
    /// Send text to the remote agent. Returns the id of the sent message.
    async fn send(&self, text: &str) -> Result<i64, String>;
    /// Re-read one message of the conversation. `Ok(None)` when it does not exist.
    async fn fetch(&self, message_id: i64) -> Result<Option<InboundEvent>, String>;
    /// Press a button on one of the remote agent's messages.
    async fn click(&self, button: &Button) -> Result<(), String>;
    /// Stop the channel connector. Default does nothing.
    fn stop(&self) {}
}
