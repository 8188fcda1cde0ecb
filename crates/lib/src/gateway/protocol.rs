//! Gateway HTTP request and response bodies.

use crate::channels::Button;
use crate::relay::RelayReply;
use serde::{Deserialize, Serialize};

/// Body of `POST /search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
}

/// Body of `POST /click`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRequest {
    pub message_id: i64,
    pub button_text: String,
}

/// Success body: `{ "status": "success", "data": {raw, ...fields}, "buttons": [{text, msg_id, url}] }`.
#[derive(Debug, Clone, Serialize)]
pub struct RelayResponse {
    pub status: &'static str,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub buttons: Vec<Button>,
}

impl From<RelayReply> for RelayResponse {
    fn from(reply: RelayReply) -> Self {
        Self {
            status: "success",
            data: reply.record.to_mapping(),
            buttons: reply.buttons,
        }
    }
}

/// Failure body: `{ "detail": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
