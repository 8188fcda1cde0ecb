//! Integration test: /search and /click over HTTP against an in-test fake agent.
//! The fake publishes scripted replies onto the gateway's event bus.

use async_trait::async_trait;
use lib::channels::{AgentChannel, Button, EventBus, InboundEvent};
use lib::config::Config;
use lib::gateway::{self, GatewayState};
use lib::relay::{Relay, RelaySettings, ReplyParser, WindowTimings};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies with `replies[text]` (sent as message `id`) 50ms after a send; clicks publish `on_click`.
struct FakeAgent {
    bus: Arc<EventBus>,
    replies: HashMap<String, InboundEvent>,
    messages: Mutex<HashMap<i64, InboundEvent>>,
    on_click: Option<InboundEvent>,
    clicked: Mutex<Vec<String>>,
}

impl FakeAgent {
    fn publish_later(&self, event: InboundEvent) {
        self.messages.lock().unwrap().insert(event.id, event.clone());
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bus.publish(event);
        });
    }
}

#[async_trait]
impl AgentChannel for FakeAgent {
    fn id(&self) -> &str {
        "fake"
    }

    fn target(&self) -> &str {
        "paumes_bot"
    }

    async fn send(&self, text: &str) -> Result<i64, String> {
        if text == "explode" {
            return Err("bridge unreachable".to_string());
        }
        if let Some(reply) = self.replies.get(text) {
            self.publish_later(reply.clone());
        }
        Ok(1)
    }

    async fn fetch(&self, message_id: i64) -> Result<Option<InboundEvent>, String> {
        Ok(self.messages.lock().unwrap().get(&message_id).cloned())
    }

    async fn click(&self, button: &Button) -> Result<(), String> {
        self.clicked.lock().unwrap().push(button.label.clone());
        if let Some(ref event) = self.on_click {
            self.publish_later(event.clone());
        }
        Ok(())
    }
}

struct Harness {
    base: String,
    agent: Arc<FakeAgent>,
    client: reqwest::Client,
}

impl Harness {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .expect("request");
        let status = resp.status().as_u16();
        (status, resp.json().await.expect("json body"))
    }
}

async fn start(with_relay: bool) -> Harness {
    let bus = Arc::new(EventBus::new());
    let mut replies = HashMap::new();
    replies.insert(
        "a@b.com".to_string(),
        InboundEvent::new(
            20,
            "@paumes_bot",
            Some("Demande: a@b.com\n**Source A**\nE-mail: a@b.com\nNombre de résultats: 1".into()),
        )
        .with_buttons(vec![vec!["⬅️ Retour".into(), "✅ Confirmer".into()]]),
    );
    let agent = Arc::new(FakeAgent {
        bus: bus.clone(),
        replies,
        messages: Mutex::new(HashMap::new()),
        on_click: Some(InboundEvent::new(21, "paumes_bot", Some("Statut: confirmé".into()))),
        clicked: Mutex::new(Vec::new()),
    });
    let timings = WindowTimings::new(Duration::from_millis(800), Duration::from_millis(150));
    let relay = Relay::new(
        agent.clone(),
        bus.clone(),
        RelaySettings {
            query: timings,
            click: timings,
        },
        ReplyParser::default(),
    );
    let relay = if with_relay { Some(Arc::new(relay)) } else { None };
    let app = gateway::router(GatewayState::new(Config::default(), bus, relay));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Harness {
        base: format!("http://{}", addr),
        agent,
        client: reqwest::Client::new(),
    }
}

#[tokio::test]
async fn search_returns_record_and_buttons() {
    let h = start(true).await;
    let (status, body) = h.post("/search", json!({ "query": "a@b.com" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["Source"], "Source A");
    assert_eq!(body["data"]["E-mail"], "a@b.com");
    assert!(body["data"].get("Demande").is_none());
    assert!(body["data"].get("Nombre de résultats").is_none());
    assert_eq!(
        body["buttons"][1],
        json!({ "text": "✅ Confirmer", "msg_id": 20, "url": null })
    );
}

#[tokio::test]
async fn click_resolves_loose_label() {
    let h = start(true).await;
    let (status, _) = h.post("/search", json!({ "query": "a@b.com" })).await;
    assert_eq!(status, 200);

    let (status, body) = h
        .post("/click", json!({ "message_id": 20, "button_text": "Confirmer" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["Statut"], "confirmé");
    assert_eq!(*h.agent.clicked.lock().unwrap(), vec!["✅ Confirmer".to_string()]);
}

#[tokio::test]
async fn silent_agent_is_gateway_timeout() {
    let h = start(true).await;
    let (status, body) = h.post("/search", json!({ "query": "nobody home" })).await;
    assert_eq!(status, 504);
    assert_eq!(body["detail"], "Timeout: No response from bot.");
}

#[tokio::test]
async fn unknown_message_or_button_is_not_found() {
    let h = start(true).await;
    let (status, _) = h
        .post("/click", json!({ "message_id": 999, "button_text": "Suivant" }))
        .await;
    assert_eq!(status, 404);

    h.post("/search", json!({ "query": "a@b.com" })).await;
    let (status, body) = h
        .post("/click", json!({ "message_id": 20, "button_text": "Annuler" }))
        .await;
    assert_eq!(status, 404);
    assert!(body["detail"].as_str().unwrap().contains("Annuler"));
}

#[tokio::test]
async fn transport_failure_is_server_error() {
    let h = start(true).await;
    let (status, body) = h.post("/search", json!({ "query": "explode" })).await;
    assert_eq!(status, 500);
    assert_eq!(body["detail"], "bridge unreachable");
}

#[tokio::test]
async fn unconfigured_relay_is_server_error() {
    let h = start(false).await;
    let (status, body) = h.post("/search", json!({ "query": "a@b.com" })).await;
    assert_eq!(status, 500);
    assert_eq!(body["detail"], "Telegram bridge not configured.");
}
