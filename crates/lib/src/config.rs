//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.chatrelay/config.json`), a `.env` file in
//! the working directory, and the environment. Credentials and the backend URL are
//! normally supplied through the environment; env values override the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Slack credentials.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Query backend endpoint and timeouts.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Relay policy: concurrency cap, messages, forward budget.
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Slack tokens. Overridden by SLACK_BOT_TOKEN / SLACK_APP_TOKEN env.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Bot token (xoxb-...), used for chat.postMessage.
    pub bot_token: Option<String>,
    /// App-level token (xapp-...), used to open the Socket Mode connection.
    pub app_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Streaming query endpoint. Overridden by BACKEND_URL env. When absent every
    /// forward is aborted (the mention is acknowledged but not answered).
    pub url: Option<String>,

    /// TCP connect timeout for backend requests (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Upper bound on concurrently running forwards; mentions past it are rejected (default 32).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Posted to the conversation as soon as a mention is accepted.
    #[serde(default = "default_processing_message")]
    pub processing_message: String,

    /// Total budget for one forward, request to last frame (default 300).
    #[serde(default = "default_forward_timeout_secs")]
    pub forward_timeout_secs: u64,

    /// Posted when a forward fails before any frame was delivered. Unset = silent.
    #[serde(default)]
    pub failure_notice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// `service.name` resource on every exported span (default "chatrelay-bot").
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP collector endpoint. Overridden by OTEL_EXPORTER_OTLP_ENDPOINT env. Unset =
    /// spans are exported to stdout.
    pub otlp_endpoint: Option<String>,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_in_flight() -> usize {
    crate::gateway::DEFAULT_MAX_IN_FLIGHT
}

fn default_processing_message() -> String {
    crate::gateway::DEFAULT_PROCESSING_MESSAGE.to_string()
}

fn default_forward_timeout_secs() -> u64 {
    300
}

fn default_service_name() -> String {
    "chatrelay-bot".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            processing_message: default_processing_message(),
            forward_timeout_secs: default_forward_timeout_secs(),
            failure_notice: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl RelayConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

/// Env value wins when set and non-blank; otherwise the trimmed, non-blank config value.
fn env_or_config(env_value: Option<String>, config_value: Option<&String>) -> Option<String> {
    env_value
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config_value
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve the Slack bot token: env SLACK_BOT_TOKEN overrides config.
pub fn resolve_slack_bot_token(config: &Config) -> Option<String> {
    env_or_config(
        std::env::var("SLACK_BOT_TOKEN").ok(),
        config.slack.bot_token.as_ref(),
    )
}

/// Resolve the Slack app-level token: env SLACK_APP_TOKEN overrides config.
pub fn resolve_slack_app_token(config: &Config) -> Option<String> {
    env_or_config(
        std::env::var("SLACK_APP_TOKEN").ok(),
        config.slack.app_token.as_ref(),
    )
}

/// Resolve the backend URL: env BACKEND_URL overrides config.
pub fn resolve_backend_url(config: &Config) -> Option<String> {
    env_or_config(std::env::var("BACKEND_URL").ok(), config.backend.url.as_ref())
}

/// Resolve the trace collector endpoint: env OTEL_EXPORTER_OTLP_ENDPOINT overrides config.
pub fn resolve_otlp_endpoint(config: &Config) -> Option<String> {
    env_or_config(
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        config.telemetry.otlp_endpoint.as_ref(),
    )
}

/// Load `.env` from the working directory (or a parent) into the process environment.
/// A missing file is not an error; system environment variables are used as-is.
/// Call before the logger is initialized so `.env` can set `RUST_LOG`. Returns the
/// file that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv::dotenv().ok()
}

/// Like [`load_dotenv`] for an explicit file. Variables already set are kept.
pub fn load_dotenv_from(path: &Path) -> Option<PathBuf> {
    dotenv::from_path(path).ok().map(|()| path.to_path_buf())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CHATRELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".chatrelay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
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
