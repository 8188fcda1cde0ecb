//! Relay core: correlate the remote agent's multi-message, edit-prone replies into one record.
//!
//! A cycle subscribes to the event bus, triggers the agent (query or button click),
//! waits for the reply to settle, then parses it and picks the current buttons.

mod buffer;
mod buttons;
mod coordinator;
mod error;
mod parser;
mod window;

pub use buffer::EventBuffer;
pub use buttons::{latest_buttons, resolve_button};
pub use coordinator::{Relay, RelayReply, RelaySettings};
pub use error::RelayError;
pub use parser::{split_label_value, ParsedRecord, ReplyParser, NOISE_LABELS, SOURCE_LABEL};
pub use window::{CorrelationWindow, WindowTimings};
