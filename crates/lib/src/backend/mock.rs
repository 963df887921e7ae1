//! Mock backend for local runs: streams a canned word-by-word reply as frames.
//!
//! `POST /v1/chat/stream` with `{"user_id", "query"}` answers
//! `Hello , <user_id> ! You said: <query>`, one word per frame, ids 1..=7.

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;

pub const STREAM_PATH: &str = "/v1/chat/stream";
pub const DEFAULT_PORT: u16 = 8091;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct ChatRequest {
    user_id: String,
    query: String,
}

#[derive(Clone)]
struct MockState {
    delay: Duration,
}

/// Port from `MOCK_BACKEND_PORT`, falling back to 8091.
pub fn resolve_port() -> u16 {
    std::env::var("MOCK_BACKEND_PORT")
        .ok()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Words of the canned reply, in order.
pub fn reply_words(user_id: &str, query: &str) -> Vec<String> {
    ["Hello", ",", user_id, "!", "You", "said:", query]
        .iter()
        .map(|w| w.to_string())
        .collect()
}

/// Encode one frame; multi-line text becomes several `data:` lines.
pub fn encode_frame(id: usize, text: &str) -> String {
    let mut out = format!("id: {}\n", id);
    for line in text.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

pub fn router(delay: Duration) -> Router {
    Router::new()
        .route(STREAM_PATH, post(stream_handler))
        .with_state(MockState { delay })
}

/// Serve on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, delay: Duration) -> Result<()> {
    axum::serve(listener, router(delay))
        .await
        .context("mock backend exited")
}

/// Bind `bind:port` and serve until the process exits.
pub async fn run_mock_backend(bind: &str, port: u16, delay: Duration) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding mock backend to {}", addr))?;
    let local: SocketAddr = listener.local_addr()?;
    log::info!("mock backend listening on http://{}{}", local, STREAM_PATH);
    serve(listener, delay).await
}

async fn stream_handler(State(state): State<MockState>, body: Bytes) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return (StatusCode::BAD_REQUEST, "Invalid JSON").into_response(),
    };
    log::debug!("mock backend: query from {}", req.user_id);
    let delay = state.delay;
    let words = reply_words(&req.user_id, &req.query);
    let frames = futures_util::stream::iter(words.into_iter().enumerate()).then(
        move |(i, word)| async move {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, Infallible>(Bytes::from(encode_frame(i + 1, &word)))
        },
    );
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
