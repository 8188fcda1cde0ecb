//! Inbound events from the remote agent's conversation: new or edited messages with their buttons.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An actionable option attached to one message (inline keyboard button).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    #[serde(rename = "text")]
    pub label: String,
    #[serde(rename = "msg_id")]
    pub owning_message_id: i64,
    pub url: Option<String>,
}

impl Button {
    pub fn new(label: impl Into<String>, owning_message_id: i64) -> Self {
        Self {
            label: label.into(),
            owning_message_id,
            url: None,
        }
    }
}

/// One observation of a message in the remote agent's chat.
///
/// `id` is stable across edits; `buttons` is a snapshot of the message's
/// current rows and may shrink, grow or vanish on edit.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: i64,
    /// Normalized identity of the message's sender (see [`sender_key`]).
    pub sender: String,
    pub text: Option<String>,
    pub buttons: Vec<Vec<Button>>,
    pub is_edit: bool,
    pub observed_at: DateTime<Utc>,
}

impl InboundEvent {
    /// A new (unedited) message observed now.
    pub fn new(id: i64, sender: impl Into<String>, text: Option<String>) -> Self {
        Self {
            id,
            sender: sender_key(&sender.into()),
            text,
            buttons: Vec::new(),
            is_edit: false,
            observed_at: Utc::now(),
        }
    }

    /// Mark as an edit of an earlier message with the same id.
    pub fn edited(mut self) -> Self {
        self.is_edit = true;
        self
    }

    pub fn with_buttons(mut self, rows: Vec<Vec<String>>) -> Self {
        let id = self.id;
        self.buttons = rows
            .into_iter()
            .map(|row| row.into_iter().map(|label| Button::new(label, id)).collect())
            .collect();
        self
    }

    pub fn with_observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// Body text when present and not blank.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }

    pub fn has_buttons(&self) -> bool {
        self.buttons.iter().any(|row| !row.is_empty())
    }
}

/// Normalize a chat identity: `@Name`, `name` and `NAME` all map to `name`; numeric ids stay as-is.
pub fn sender_key(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}
