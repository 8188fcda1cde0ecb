//! Communication channels (e.g. Telegram).
//!
//! The connector publishes every message it observes from the remote agent to the
//! [`EventBus`]; relay cycles subscribe per request and drive the conversation
//! through an [`AgentChannel`] handle.

mod bus;
mod handle;
mod inbound;
mod telegram;

pub use bus::{EventBus, Subscription, SubscriptionToken};
pub use handle::AgentChannel;
pub use inbound::{sender_key, Button, InboundEvent};
pub use telegram::{TelegramChannel, TelegramMessage, TelegramUpdate};
