//! Gateway HTTP server (single port).

use crate::channels::{AgentChannel, EventBus, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::gateway::protocol::{ClickRequest, ErrorBody, RelayResponse, SearchRequest};
use crate::relay::{Relay, RelayError};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

const NOT_CONFIGURED: &str = "Telegram bridge not configured.";

/// Shared state for the gateway.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Demultiplexed stream of the remote agent's messages.
    pub bus: Arc<EventBus>,
    /// None when no bridge is configured; relay endpoints then answer 500.
    pub relay: Option<Arc<Relay>>,
    /// Set in webhook mode so POSTed updates can be published.
    pub telegram: Option<Arc<TelegramChannel>>,
}

impl GatewayState {
    pub fn new(config: Config, bus: Arc<EventBus>, relay: Option<Arc<Relay>>) -> Self {
        Self {
            config: Arc::new(config),
            bus,
            relay,
            telegram: None,
        }
    }
}

/// Failure response: status plus `{ "detail": ... }`.
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let status = match &e {
            RelayError::NoResponse => StatusCode::GATEWAY_TIMEOUT,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::warn!("relay cycle failed: {}", e);
        } else {
            log::debug!("relay cycle: {}", e);
        }
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

fn relay_of(state: &GatewayState) -> Result<Arc<Relay>, ApiError> {
    state.relay.clone().ok_or_else(|| ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        detail: NOT_CONFIGURED.to_string(),
    })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("ignoring invalid CORS origin {:?}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(list))
}

/// Build the HTTP router over `state`.
pub fn router(state: GatewayState) -> Router {
    let cors = cors_layer(&state.config.gateway.allowed_origins);
    Router::new()
        .route("/health", get(health_http))
        .route("/search", post(search_http))
        .route("/click", post(click_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .layer(cors)
        .with_state(state)
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Starts the Telegram bridge connector when a bridge URL is configured.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bus = Arc::new(EventBus::new());
    let mut state = GatewayState::new(config.clone(), bus.clone(), None);
    let mut channel_task: Option<JoinHandle<()>> = None;

    if let Some(api_base) = config::resolve_bridge_url(&config) {
        let target = config::resolve_bot_target(&config);
        let telegram = Arc::new(TelegramChannel::new(
            api_base,
            config::resolve_bridge_token(&config),
            target.clone(),
        ));
        if let Some(ref url) = config.channels.telegram.webhook_url {
            let secret = config.channels.telegram.webhook_secret.as_deref();
            if let Err(e) = telegram.set_webhook(url, secret).await {
                log::warn!("telegram set_webhook failed: {}", e);
            } else {
                log::info!("telegram channel registered (webhook mode): {}", url);
            }
            state.telegram = Some(telegram.clone());
        } else {
            channel_task = Some(telegram.clone().start_inbound(bus.clone()));
        }
        state.relay = Some(Arc::new(Relay::new(
            telegram.clone(),
            bus,
            config.relay.settings(),
            config.relay.parser(),
        )));
        log::info!("relay ready for {}", target);
    } else {
        log::warn!("no Telegram bridge configured (TELEGRAM_BRIDGE_URL); /search and /click will fail");
    }

    let relay = state.relay.clone();
    let webhook = state.telegram.clone();
    let app = router(state);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(relay, webhook, channel_task))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops the channel connector, removes the webhook if used, then awaits the poll task.
async fn shutdown_signal(
    relay: Option<Arc<Relay>>,
    webhook: Option<Arc<TelegramChannel>>,
    channel_task: Option<JoinHandle<()>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channel");

    if let Some(relay) = relay {
        AgentChannel::stop(relay.channel().as_ref());
    }

    if let Some(t) = webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    // The poll loop notices the stop flag after its current long poll returns.
    if let Some(h) = channel_task {
        let _ = h.await;
    }
    log::info!("channel task finished");
}

/// GET /health: liveness probe.
async fn health_http() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /search: send the query to the remote agent and return its parsed reply.
async fn search_http(
    State(state): State<GatewayState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<RelayResponse>, ApiError> {
    let relay = relay_of(&state)?;
    let reply = relay.search(&req.query).await?;
    Ok(Json(reply.into()))
}

/// POST /click: press a button on one of the agent's messages and return the outcome.
async fn click_http(
    State(state): State<GatewayState>,
    Json(req): Json<ClickRequest>,
) -> Result<Json<RelayResponse>, ApiError> {
    let relay = relay_of(&state)?;
    let reply = relay.click(req.message_id, &req.button_text).await?;
    Ok(Json(reply.into()))
}

/// POST /telegram/webhook: receives bridge update JSON; verifies optional secret, publishes to the bus.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let Some(ref telegram) = state.telegram else {
        return StatusCode::NOT_FOUND;
    };
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    telegram.handle_update(&state.bus, update);
    StatusCode::OK
}
