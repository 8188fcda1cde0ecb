//! Telegram channel: talks to the remote bot through a user-session bridge.
//!
//! A bot cannot converse with another bot, so the relay drives a Telegram *user*
//! session exposed over a Bot-API-shaped HTTP surface (getUpdates, sendMessage,
//! getMessage, pressButton, setWebhook, deleteWebhook). Both new and edited
//! messages sent by the target are published to the event bus; the session's own
//! outgoing messages in the same chat are not.

use crate::channels::bus::EventBus;
use crate::channels::handle::AgentChannel;
use crate::channels::inbound::{sender_key, Button, InboundEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

const LONG_POLL_TIMEOUT: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Bridge update payload (getUpdates result item or webhook POST body).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    /// Set by the bridge on messages the session itself sent.
    #[serde(default)]
    pub out: bool,
    #[serde(default)]
    pub text: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub date: Option<i64>,
    #[serde(default)]
    pub edit_date: Option<i64>,
    #[serde(default)]
    pub reply_markup: Option<ReplyMarkup>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyMarkup {
    #[serde(default)]
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
}

impl TelegramMessage {
    /// True when `target` (a [`sender_key`]) sent this message into its own chat.
    /// Outgoing messages never match. Without `from`, the chat identifies the sender.
    fn is_from(&self, target: &str) -> bool {
        if self.out || !identifies(self.chat.id, self.chat.username.as_deref(), target) {
            return false;
        }
        match &self.from {
            Some(user) => identifies(user.id, user.username.as_deref(), target),
            None => true,
        }
    }

    /// Time of the version this message represents: `edit_date`, else `date`, else now.
    fn observed_at(&self) -> DateTime<Utc> {
        self.edit_date
            .or(self.date)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now)
    }

    /// Convert to an inbound event attributed to `target`.
    pub fn to_event(&self, target: &str, is_edit: bool) -> InboundEvent {
        let id = self.message_id;
        let buttons = self
            .reply_markup
            .as_ref()
            .map(|m| {
                m.inline_keyboard
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|b| Button {
                                label: b.text.clone(),
                                owning_message_id: id,
                                url: b.url.clone(),
                            })
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut event = InboundEvent::new(id, target, self.text.clone())
            .with_observed_at(self.observed_at());
        event.buttons = buttons;
        event.is_edit = is_edit;
        event
    }
}

fn identifies(id: i64, username: Option<&str>, target: &str) -> bool {
    id.to_string() == target || username.is_some_and(|u| sender_key(u) == target)
}

impl TelegramUpdate {
    /// The event carried by this update when it comes from `target`'s chat.
    pub fn into_event(self, target: &str) -> Option<InboundEvent> {
        let (msg, is_edit) = match (self.message, self.edited_message) {
            (_, Some(m)) => (m, true),
            (Some(m), None) => (m, false),
            (None, None) => return None,
        };
        if !msg.is_from(target) {
            return None;
        }
        Some(msg.to_event(target, is_edit))
    }
}

/// Telegram channel connector over the user-session bridge.
pub struct TelegramChannel {
    id: String,
    api_base: String,
    token: Option<String>,
    /// Chat as configured (e.g. "@paumes_bot"); passed as chat_id to the bridge.
    chat: String,
    /// Normalized form of `chat`, compared against incoming messages.
    target: String,
    running: AtomicBool,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(api_base: impl Into<String>, token: Option<String>, chat: impl Into<String>) -> Self {
        let chat = chat.into();
        Self {
            id: "telegram".to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
            target: sender_key(&chat),
            chat,
            running: AtomicBool::new(false),
            client: reqwest::Client::new(),
        }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn method_url(&self, method: &str) -> String {
        match &self.token {
            Some(token) => format!("{}/bot{}/{}", self.api_base, token, method),
            None => format!("{}/{}", self.api_base, method),
        }
    }

    /// POST a JSON body to a bridge method and unwrap the `{ok, result}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<Option<T>, String> {
        let res = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("{} failed: {} {}", method, status, body));
        }
        let data: ApiResponse<T> = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err(format!(
                "{} returned ok: false ({})",
                method,
                data.description.unwrap_or_default()
            ));
        }
        Ok(data.result)
    }

    /// Start the getUpdates long-poll loop and publish the target's messages to the bus.
    pub fn start_inbound(self: Arc<Self>, bus: Arc<EventBus>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        log::info!("telegram channel: starting getUpdates long-poll loop for {}", self.chat);
        tokio::spawn(async move {
            run_get_updates_loop(self, bus).await;
        })
    }

    /// Publish one update (from the poll loop or a webhook POST). Returns true when it was the target's.
    pub fn handle_update(&self, bus: &EventBus, update: TelegramUpdate) -> bool {
        let update_id = update.update_id;
        match update.into_event(&self.target) {
            Some(event) => {
                log::debug!(
                    "telegram: update {} -> message {} (edit: {})",
                    update_id,
                    event.id,
                    event.is_edit
                );
                bus.publish(event);
                true
            }
            None => false,
        }
    }

    /// Call getUpdates (long poll). Returns (updates, next_offset).
    async fn get_updates(&self, offset: Option<i64>) -> Result<(Vec<TelegramUpdate>, Option<i64>), String> {
        let url = format!("{}?timeout={}", self.method_url("getUpdates"), LONG_POLL_TIMEOUT);
        let url = if let Some(off) = offset {
            format!("{}&offset={}", url, off)
        } else {
            url
        };
        let res = self.client.get(&url).send().await.map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("getUpdates failed: {} {}", status, body));
        }
        let data: ApiResponse<Vec<TelegramUpdate>> = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err("getUpdates returned ok: false".to_string());
        }
        let updates = data.result.unwrap_or_default();
        let next_offset = updates.iter().map(|u| u.update_id).max().map(|id| id + 1);
        Ok((updates, next_offset))
    }

    /// Set webhook URL (and optional secret). When set, the bridge POSTs updates to the URL instead of getUpdates.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), String> {
        let mut body = serde_json::json!({ "url": url });
        if let Some(s) = secret {
            body["secret_token"] = serde_json::Value::String(s.to_string());
        }
        self.call::<serde_json::Value>("setWebhook", body).await?;
        Ok(())
    }

    /// Remove webhook so getUpdates can be used again.
    pub async fn delete_webhook(&self) -> Result<(), String> {
        self.call::<serde_json::Value>("deleteWebhook", serde_json::json!({}))
            .await?;
        Ok(())
    }
}

async fn run_get_updates_loop(channel: Arc<TelegramChannel>, bus: Arc<EventBus>) {
    let mut offset: Option<i64> = None;
    while channel.running() {
        match channel.get_updates(offset).await {
            Ok((updates, next)) => {
                if next.is_some() {
                    offset = next;
                }
                for u in updates {
                    channel.handle_update(&bus, u);
                }
            }
            Err(e) => {
                log::warn!("telegram getUpdates error: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
    log::info!("telegram channel: getUpdates loop stopped");
}

#[async_trait]
impl AgentChannel for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn send(&self, text: &str) -> Result<i64, String> {
        let body = serde_json::json!({ "chat_id": self.chat, "text": text });
        let sent: Option<TelegramMessage> = self.call("sendMessage", body).await?;
        sent.map(|m| m.message_id)
            .ok_or_else(|| "sendMessage returned no message".to_string())
    }

    async fn fetch(&self, message_id: i64) -> Result<Option<InboundEvent>, String> {
        let body = serde_json::json!({ "chat_id": self.chat, "message_id": message_id });
        let msg: Option<TelegramMessage> = self.call("getMessage", body).await?;
        Ok(msg.map(|m| {
            let is_edit = m.edit_date.is_some();
            m.to_event(&self.target, is_edit)
        }))
    }

    async fn click(&self, button: &Button) -> Result<(), String> {
        let body = serde_json::json!({
            "chat_id": self.chat,
            "message_id": button.owning_message_id,
            "text": button.label,
        });
        self.call::<serde_json::Value>("pressButton", body).await?;
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
