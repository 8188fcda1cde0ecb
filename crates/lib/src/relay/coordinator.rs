//! Relay coordinator: one query or click cycle against the remote agent.
//!
//! A cycle opens a correlation window (subscription) before triggering the agent,
//! waits for settlement, then parses the settled messages and exposes the latest
//! button set. Cycles against the conversation are serialized: the channel cannot
//! tell which reply answers which request.

use crate::channels::{AgentChannel, Button, EventBus, InboundEvent};
use crate::relay::buttons::{latest_buttons, resolve_button};
use crate::relay::error::RelayError;
use crate::relay::parser::{ParsedRecord, ReplyParser};
use crate::relay::window::{CorrelationWindow, WindowTimings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Window timings per cycle kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySettings {
    pub query: WindowTimings,
    pub click: WindowTimings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            query: WindowTimings::new(Duration::from_secs(20), Duration::from_millis(2500)),
            click: WindowTimings::new(Duration::from_secs(15), Duration::from_millis(1500)),
        }
    }
}

/// Result of a cycle: the parsed record and the buttons now on offer (flattened, row order).
#[derive(Debug, Clone)]
pub struct RelayReply {
    pub record: ParsedRecord,
    pub buttons: Vec<Button>,
}

pub struct Relay {
    channel: Arc<dyn AgentChannel>,
    bus: Arc<EventBus>,
    settings: RelaySettings,
    parser: ReplyParser,
    /// Held for a whole cycle; queued cycles wait here.
    turn: Mutex<()>,
}

impl Relay {
    pub fn new(
        channel: Arc<dyn AgentChannel>,
        bus: Arc<EventBus>,
        settings: RelaySettings,
        parser: ReplyParser,
    ) -> Self {
        Self {
            channel,
            bus,
            settings,
            parser,
            turn: Mutex::new(()),
        }
    }

    pub fn channel(&self) -> &Arc<dyn AgentChannel> {
        &self.channel
    }

    /// Send `query` to the remote agent and return its settled, parsed reply.
    pub async fn search(&self, query: &str) -> Result<RelayReply, RelayError> {
        let _turn = self.turn.lock().await;
        let window = CorrelationWindow::open(&self.bus, self.channel.target());
        log::info!("relay: query cycle {} started", window.token());
        let sent = self.channel.send(query).await?;
        log::debug!("relay: query sent as message {}", sent);
        let events = window.await_settlement(self.settings.query).await?;
        Ok(self.build_reply(&events))
    }

    /// Press the button labelled `button_text` on message `message_id` and return the outcome.
    ///
    /// When nothing new arrives after the click, the clicked message is re-read: the
    /// agent may have edited it in place without an edit notification reaching us.
    pub async fn click(&self, message_id: i64, button_text: &str) -> Result<RelayReply, RelayError> {
        let _turn = self.turn.lock().await;
        let message = self.fetch_message(message_id).await?;
        let button = resolve_button(&message.buttons, message_id, button_text)?.clone();

        let window = CorrelationWindow::open(&self.bus, self.channel.target());
        log::info!(
            "relay: click cycle {} started ({:?} on message {})",
            window.token(),
            button.label,
            message_id
        );
        self.channel.click(&button).await?;
        let events = match window.await_settlement(self.settings.click).await {
            Ok(events) => events,
            Err(RelayError::NoResponse) => {
                log::debug!("relay: no event after click, re-reading message {}", message_id);
                vec![self.fetch_message(message_id).await?]
            }
            Err(e) => return Err(e),
        };
        Ok(self.build_reply(&events))
    }

    async fn fetch_message(&self, message_id: i64) -> Result<InboundEvent, RelayError> {
        self.channel
            .fetch(message_id)
            .await?
            .ok_or(RelayError::MessageNotFound(message_id))
    }

    fn build_reply(&self, events: &[InboundEvent]) -> RelayReply {
        let texts: Vec<&str> = events.iter().filter_map(InboundEvent::body).collect();
        let record = self.parser.parse(&texts);
        let buttons = latest_buttons(events).into_iter().flatten().collect();
        RelayReply { record, buttons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicI64, Ordering};

    type Script = Vec<(Duration, InboundEvent)>;

    /// Fake agent: each send/click plays the next script onto the bus (delays from the trigger).
    /// With no script queued, `send` echoes `Réponse: <text>` after 100ms.
    struct ScriptedChannel {
        bus: Arc<EventBus>,
        scripts: std::sync::Mutex<VecDeque<Script>>,
        messages: Arc<std::sync::Mutex<HashMap<i64, InboundEvent>>>,
        edit_on_click: std::sync::Mutex<Option<InboundEvent>>,
        clicks: std::sync::Mutex<Vec<Button>>,
        next_id: AtomicI64,
    }

    impl ScriptedChannel {
        fn new(bus: Arc<EventBus>) -> Self {
            Self {
                bus,
                scripts: std::sync::Mutex::new(VecDeque::new()),
                messages: Arc::new(std::sync::Mutex::new(HashMap::new())),
                edit_on_click: std::sync::Mutex::new(None),
                clicks: std::sync::Mutex::new(Vec::new()),
                next_id: AtomicI64::new(100),
            }
        }

        fn script(self, script: Script) -> Self {
            self.scripts.lock().unwrap().push_back(script);
            self
        }

        fn with_message(self, event: InboundEvent) -> Self {
            self.messages.lock().unwrap().insert(event.id, event);
            self
        }

        fn play(&self, script: Script) {
            let bus = self.bus.clone();
            let messages = self.messages.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now();
                for (at, event) in script {
                    tokio::time::sleep_until(start + at).await;
                    messages.lock().unwrap().insert(event.id, event.clone());
                    bus.publish(event);
                }
            });
        }
    }

    #[async_trait]
    impl AgentChannel for ScriptedChannel {
        fn id(&self) -> &str {
            "scripted"
        }

        fn target(&self) -> &str {
            "bot"
        }

        async fn send(&self, text: &str) -> Result<i64, String> {
            let next = self.scripts.lock().unwrap().pop_front();
            let script = next.unwrap_or_else(|| {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                vec![(
                    Duration::from_millis(100),
                    InboundEvent::new(id, "bot", Some(format!("Réponse: {}", text))),
                )]
            });
            self.play(script);
            Ok(1)
        }

        async fn fetch(&self, message_id: i64) -> Result<Option<InboundEvent>, String> {
            Ok(self.messages.lock().unwrap().get(&message_id).cloned())
        }

        async fn click(&self, button: &Button) -> Result<(), String> {
            self.clicks.lock().unwrap().push(button.clone());
            if let Some(edit) = self.edit_on_click.lock().unwrap().take() {
                self.messages.lock().unwrap().insert(edit.id, edit);
            }
            let next = self.scripts.lock().unwrap().pop_front();
            if let Some(script) = next {
                self.play(script);
            }
            Ok(())
        }
    }

    struct FailingChannel;

    #[async_trait]
    impl AgentChannel for FailingChannel {
        fn id(&self) -> &str {
            "failing"
        }
        fn target(&self) -> &str {
            "bot"
        }
        async fn send(&self, _text: &str) -> Result<i64, String> {
            Err("connection reset".to_string())
        }
        async fn fetch(&self, _message_id: i64) -> Result<Option<InboundEvent>, String> {
            Err("connection reset".to_string())
        }
        async fn click(&self, _button: &Button) -> Result<(), String> {
            Err("connection reset".to_string())
        }
    }

    fn relay(bus: &Arc<EventBus>, channel: Arc<ScriptedChannel>) -> Relay {
        Relay::new(channel, bus.clone(), RelaySettings::default(), ReplyParser::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn search_parses_single_reply() {
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(ScriptedChannel::new(bus.clone()).script(vec![(
            ms(300),
            InboundEvent::new(
                1,
                "bot",
                Some("Demande: foo\n**Source A**\nE-mail: a@b.com\nTéléphone: 0101010101".into()),
            ),
        )]));
        let reply = relay(&bus, channel).search("foo").await.unwrap();
        assert_eq!(reply.record.get("Source"), Some("Source A"));
        assert_eq!(reply.record.get("E-mail"), Some("a@b.com"));
        assert_eq!(reply.record.get("Téléphone"), Some("0101010101"));
        assert!(reply.record.get("Demande").is_none());
        assert!(reply.buttons.is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn search_waits_for_edit_that_adds_buttons() {
        let bus = Arc::new(EventBus::new());
        let first = InboundEvent::new(1, "bot", Some("Résultats\nE-mail: a@b.com".into()));
        let edit = InboundEvent::new(
            1,
            "bot",
            Some("Résultats\nE-mail: a@b.com\nNombre de résultats: 5".into()),
        )
        .edited()
        .with_buttons(vec![vec!["Suivant".into()]]);
        let channel = Arc::new(
            ScriptedChannel::new(bus.clone()).script(vec![(ms(500), first), (ms(1500), edit)]),
        );
        let reply = relay(&bus, channel).search("a@b.com").await.unwrap();
        let labels: Vec<&str> = reply.buttons.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["Suivant"]);
        assert!(reply.record.fields.iter().all(|(l, _)| l != "Nombre de résultats"));
        assert!(reply.record.raw.contains("Nombre de résultats: 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn search_merges_follow_up_messages_in_id_order() {
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(ScriptedChannel::new(bus.clone()).script(vec![
            (ms(100), InboundEvent::new(5, "bot", Some("Source B".into()))),
            (
                ms(900),
                InboundEvent::new(6, "bot", Some("Nom: Martin".into()))
                    .with_buttons(vec![vec!["Page 2".into(), "Page 20".into()]]),
            ),
            (ms(1800), InboundEvent::new(7, "bot", Some("Ville: Lyon".into()))),
        ]));
        let reply = relay(&bus, channel).search("martin").await.unwrap();
        assert_eq!(reply.record.raw, "Source B\nNom: Martin\nVille: Lyon");
        assert_eq!(reply.record.get("Source"), Some("Source B"));
        assert_eq!(reply.buttons.len(), 2);
        assert!(reply.buttons.iter().all(|b| b.owning_message_id == 6));
    }

    #[tokio::test(start_paused = true)]
    async fn search_times_out_without_reply() {
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(ScriptedChannel::new(bus.clone()).script(Vec::new()));
        let err = relay(&bus, channel).search("foo").await.unwrap_err();
        assert_eq!(err, RelayError::NoResponse);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_reported_and_releases_subscription() {
        let bus = Arc::new(EventBus::new());
        let relay = Relay::new(
            Arc::new(FailingChannel),
            bus.clone(),
            RelaySettings::default(),
            ReplyParser::default(),
        );
        let err = relay.search("foo").await.unwrap_err();
        assert_eq!(err, RelayError::Transport("connection reset".to_string()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn click_matches_substring_and_collects_reply() {
        let bus = Arc::new(EventBus::new());
        let offer = InboundEvent::new(10, "bot", Some("Confirmer la recherche ?".into()))
            .with_buttons(vec![vec!["⬅️ Retour".into(), "✅ Confirmer".into()]]);
        let channel = Arc::new(
            ScriptedChannel::new(bus.clone())
                .with_message(offer)
                .script(vec![(ms(400), InboundEvent::new(11, "bot", Some("Statut: confirmé".into())))]),
        );
        let reply = relay(&bus, channel.clone()).click(10, "Confirmer").await.unwrap();
        assert_eq!(reply.record.get("Statut"), Some("confirmé"));
        let clicks = channel.clicks.lock().unwrap();
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks[0].label, "✅ Confirmer");
        assert_eq!(clicks[0].owning_message_id, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn click_falls_back_to_rereading_message() {
        let bus = Arc::new(EventBus::new());
        let offer = InboundEvent::new(10, "bot", Some("Page 1\nNom: A".into()))
            .with_buttons(vec![vec!["Suivant".into()]]);
        let channel = ScriptedChannel::new(bus.clone()).with_message(offer);
        *channel.edit_on_click.lock().unwrap() = Some(
            InboundEvent::new(10, "bot", Some("Page 2\nNom: B".into()))
                .edited()
                .with_buttons(vec![vec!["Précédent".into()]]),
        );
        let channel = Arc::new(channel);
        let started = tokio::time::Instant::now();
        let reply = relay(&bus, channel).click(10, "Suivant").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(reply.record.get("Nom"), Some("B"));
        assert_eq!(reply.record.get("Source"), Some("Page 2"));
        assert_eq!(reply.buttons[0].label, "Précédent");
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn click_reports_missing_message_and_buttons() {
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(
            ScriptedChannel::new(bus.clone())
                .with_message(InboundEvent::new(3, "bot", Some("plain".into())))
                .with_message(
                    InboundEvent::new(4, "bot", None).with_buttons(vec![vec!["Oui".into()]]),
                ),
        );
        let relay = relay(&bus, channel.clone());
        assert_eq!(relay.click(99, "x").await.unwrap_err(), RelayError::MessageNotFound(99));
        assert_eq!(relay.click(3, "x").await.unwrap_err(), RelayError::NoButtonsAvailable(3));
        let err = relay.click(4, "Non").await.unwrap_err();
        assert_eq!(err, RelayError::ButtonNotFound("Non".to_string()));
        assert!(err.is_not_found());
        assert!(channel.clicks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_searches_do_not_share_replies() {
        let bus = Arc::new(EventBus::new());
        let channel = Arc::new(ScriptedChannel::new(bus.clone()));
        let relay = Arc::new(relay(&bus, channel));
        let a = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.search("alpha").await })
        };
        let b = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.search("beta").await })
        };
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.record.raw, "Réponse: alpha");
        assert_eq!(b.record.raw, "Réponse: beta");
        assert_eq!(bus.subscriber_count(), 0);
    }
}
