//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Bridge credentials and the target bot can be supplied through env alone.

use crate::relay::{RelaySettings, ReplyParser, WindowTimings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bot the relay talks to when none is configured.
pub const DEFAULT_BOT_TARGET: &str = "@paumes_bot";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram bridge).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Correlation timings and parser options.
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Gateway bind, port and CORS settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for HTTP (default 8000).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
}

/// Telegram user-session bridge config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bridge base URL. Overridden by TELEGRAM_BRIDGE_URL env when set. The relay is disabled without one.
    pub api_base: Option<String>,
    /// Bridge session token. Overridden by TELEGRAM_BRIDGE_TOKEN env when set.
    pub token: Option<String>,
    /// Remote bot (username or chat id). Overridden by TELEGRAM_BOT_TARGET env; defaults to @paumes_bot.
    pub target: Option<String>,
    /// When set, use webhook mode: the bridge POSTs updates to this URL. If unset, long-poll getUpdates is used.
    pub webhook_url: Option<String>,
    /// Optional secret for webhook verification (X-Telegram-Bot-Api-Secret-Token). Used only when webhook_url is set.
    pub webhook_secret: Option<String>,
}

/// Timings for one kind of cycle, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowConfig {
    /// How long to wait for the first event.
    pub initial_timeout_ms: u64,
    /// Quiet period after the last event before the reply counts as settled.
    pub settle_timeout_ms: u64,
}

impl WindowConfig {
    pub fn timings(&self) -> WindowTimings {
        WindowTimings::new(
            Duration::from_millis(self.initial_timeout_ms),
            Duration::from_millis(self.settle_timeout_ms),
        )
    }
}

fn default_query_window() -> WindowConfig {
    WindowConfig {
        initial_timeout_ms: 20_000,
        settle_timeout_ms: 2_500,
    }
}

fn default_click_window() -> WindowConfig {
    WindowConfig {
        initial_timeout_ms: 15_000,
        settle_timeout_ms: 1_500,
    }
}

/// Relay cycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Window for a fresh query (default 20s initial, 2.5s settle).
    #[serde(default = "default_query_window")]
    pub query: WindowConfig,
    /// Window after a button click (default 15s initial, 1.5s settle).
    #[serde(default = "default_click_window")]
    pub click: WindowConfig,
    /// Extra labels to drop from parsed records, on top of the built-in list.
    #[serde(default)]
    pub noise_labels: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            query: default_query_window(),
            click: default_click_window(),
            noise_labels: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn settings(&self) -> RelaySettings {
        RelaySettings {
            query: self.query.timings(),
            click: self.click.timings(),
        }
    }

    pub fn parser(&self) -> ReplyParser {
        ReplyParser::with_extra_noise(&self.noise_labels)
    }
}

/// Non-empty trimmed value of env var `name`.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_value(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the bridge URL: env TELEGRAM_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> Option<String> {
    env_value("TELEGRAM_BRIDGE_URL").or_else(|| config_value(&config.channels.telegram.api_base))
}

/// Resolve the bridge token: env TELEGRAM_BRIDGE_TOKEN overrides config.
pub fn resolve_bridge_token(config: &Config) -> Option<String> {
    env_value("TELEGRAM_BRIDGE_TOKEN").or_else(|| config_value(&config.channels.telegram.token))
}

/// Resolve the remote bot: env TELEGRAM_BOT_TARGET, then config, then [`DEFAULT_BOT_TARGET`].
pub fn resolve_bot_target(config: &Config) -> String {
    env_value("TELEGRAM_BOT_TARGET")
        .or_else(|| config_value(&config.channels.telegram.target))
        .unwrap_or_else(|| DEFAULT_BOT_TARGET.to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, else the default path (or RELAY_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
