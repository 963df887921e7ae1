//! Slack channel: Socket Mode event feed and chat.postMessage via the Web API.
//!
//! Socket Mode: `apps.connections.open` (app-level token) returns a `wss://` URL. Every
//! envelope that carries an `envelope_id` must be acknowledged by echoing
//! `{"envelope_id": ...}` on the socket. A `disconnect` envelope means Slack is about to
//! rotate the connection; the feed reconnects transparently.

use crate::channels::handle::ChannelHandle;
use crate::gateway::{EventFeed, GatewayEnvelope, GatewayEvent, MentionEvent};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const SLACK_API_BASE: &str = "https://slack.com/api";
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Upper bound on one Web API call, so a hung post cannot pin a forward forever.
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack Web API base URL; `SLACK_API_BASE` overrides it (tests, proxies).
pub fn slack_api_base() -> String {
    std::env::var("SLACK_API_BASE")
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| SLACK_API_BASE.to_string())
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Slack Web API client holding the bot token (posting) and app token (Socket Mode).
pub struct SlackChannel {
    bot_token: Option<String>,
    app_token: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(bot_token: Option<String>, app_token: Option<String>) -> Self {
        Self::with_api_base(bot_token, app_token, slack_api_base())
    }

    pub fn with_api_base(
        bot_token: Option<String>,
        app_token: Option<String>,
        api_base: String,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("slack client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            bot_token,
            app_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Call apps.connections.open; returns the Socket Mode WebSocket URL.
    pub async fn open_connection(&self) -> Result<String, String> {
        let token = self
            .app_token
            .as_ref()
            .ok_or("slack app token not configured")?;
        let url = format!("{}/apps.connections.open", self.api_base);
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let data = read_api_response(res, "apps.connections.open").await?;
        data.url
            .ok_or_else(|| "apps.connections.open returned no url".to_string())
    }

    /// Send a text message to a channel via chat.postMessage.
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<(), String> {
        let token = self
            .bot_token
            .as_ref()
            .ok_or("slack bot token not configured")?;
        let url = format!("{}/chat.postMessage", self.api_base);
        let body = serde_json::json!({ "channel": channel, "text": text });
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        read_api_response(res, "chat.postMessage").await.map(|_| ())
    }

    /// Socket Mode feed for the listener. Connects lazily on the first read.
    pub fn socket_mode_feed(self: Arc<Self>) -> SocketModeFeed {
        SocketModeFeed {
            channel: self,
            socket: None,
        }
    }
}

/// Slack answers HTTP 200 with `ok: false` for API-level errors; both cases are errors here.
async fn read_api_response(res: reqwest::Response, method: &str) -> Result<ApiResponse, String> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(format!("{} failed: {} {}", method, status, body));
    }
    let data: ApiResponse = res.json().await.map_err(|e| e.to_string())?;
    if !data.ok {
        return Err(format!(
            "{} failed: {}",
            method,
            data.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(data)
}

#[async_trait]
impl ChannelHandle for SlackChannel {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        self.post_message(conversation_id, text).await
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket Mode subscription. Reconnects on `disconnect` envelopes and dropped sockets.
pub struct SocketModeFeed {
    channel: Arc<SlackChannel>,
    socket: Option<Socket>,
}

impl SocketModeFeed {
    async fn connect(&mut self) -> Result<()> {
        if self.channel.app_token.is_none() {
            return Err(anyhow!("slack app token not configured (SLACK_APP_TOKEN)"));
        }
        loop {
            match self.try_connect().await {
                Ok(socket) => {
                    self.socket = Some(socket);
                    log::info!("slack: socket mode connected");
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("slack: socket mode connect failed: {:#}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn try_connect(&self) -> Result<Socket> {
        let url = self
            .channel
            .open_connection()
            .await
            .map_err(|e| anyhow!(e))?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .context("opening socket mode websocket")?;
        Ok(socket)
    }
}

#[async_trait]
impl EventFeed for SocketModeFeed {
    async fn next_event(&mut self) -> Result<Option<GatewayEnvelope>> {
        loop {
            if self.socket.is_none() {
                self.connect().await?;
            }
            let Some(socket) = self.socket.as_mut() else {
                continue;
            };
            let msg = match socket.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    log::warn!("slack: socket read failed: {}", e);
                    self.socket = None;
                    continue;
                }
                None => {
                    log::info!("slack: socket closed by server, reconnecting");
                    self.socket = None;
                    continue;
                }
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    log::info!("slack: close frame received ({:?}), reconnecting", frame);
                    self.socket = None;
                    continue;
                }
                _ => continue,
            };
            let envelope: SocketEnvelope = match serde_json::from_str(&text) {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("slack: unparseable socket message: {}", e);
                    continue;
                }
            };
            match envelope.typ.as_str() {
                "hello" => {
                    log::debug!("slack: hello received");
                }
                "disconnect" => {
                    log::info!(
                        "slack: disconnect requested ({}), reconnecting",
                        envelope.reason.as_deref().unwrap_or("no reason")
                    );
                    if let Some(mut socket) = self.socket.take() {
                        let _ = socket.close(None).await;
                    }
                }
                _ => return Ok(Some(envelope.into_gateway())),
            }
        }
    }

    async fn ack(&mut self, ack_id: &str) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| anyhow!("socket mode not connected"))?;
        let body = serde_json::json!({ "envelope_id": ack_id }).to_string();
        socket
            .send(Message::Text(body))
            .await
            .context("sending socket mode ack")
    }
}

/// Socket Mode wire envelope: `{ "type", "envelope_id", "payload", ... }`.
#[derive(Debug, Deserialize)]
pub struct SocketEnvelope {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventCallback {
    #[serde(default)]
    event: Option<InnerEvent>,
}

#[derive(Debug, Deserialize)]
struct InnerEvent {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

impl SocketEnvelope {
    /// Map to a gateway envelope. Only `events_api` envelopes wrapping a complete
    /// `app_mention` become mentions.
    pub fn into_gateway(self) -> GatewayEnvelope {
        let event = match (self.typ.as_str(), self.payload) {
            ("events_api", Some(payload)) => {
                match serde_json::from_value::<EventCallback>(payload) {
                    Ok(EventCallback { event: Some(inner) }) => inner_to_event(inner),
                    _ => GatewayEvent::Other {
                        kind: "events_api".to_string(),
                    },
                }
            }
            (typ, _) => GatewayEvent::Other {
                kind: typ.to_string(),
            },
        };
        GatewayEnvelope {
            ack_id: self.envelope_id,
            event,
        }
    }
}

fn inner_to_event(inner: InnerEvent) -> GatewayEvent {
    match (inner.typ.as_str(), inner.user, inner.channel) {
        ("app_mention", Some(user_id), Some(conversation_id)) => {
            GatewayEvent::Mention(MentionEvent {
                user_id,
                conversation_id,
                text: inner.text.unwrap_or_default(),
            })
        }
        (typ, _, _) => GatewayEvent::Other {
            kind: typ.to_string(),
        },
    }
}
