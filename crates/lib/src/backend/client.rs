//! HTTP client for the query backend. One POST per mention; the response body is handed
//! back as a live byte stream for the frame parser.

use crate::error::RelayError;
use crate::trace::TraceContext;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;

/// Request body: `{"user_id": ..., "query": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendQuery {
    pub user_id: String,
    pub query: String,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Backend answer, whatever its status. Dropping it closes the underlying connection.
pub struct ResponseStream {
    pub status: StatusCode,
    pub body: ByteStream,
}

/// Client for the backend query endpoint. The URL is optional so a missing
/// `BACKEND_URL` fails each forward instead of the whole process.
#[derive(Clone)]
pub struct BackendClient {
    url: Option<String>,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(url: Option<String>, connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("backend client builder failed ({}), using defaults", e);
                reqwest::Client::new()
            });
        Self {
            url: url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
            client,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// POST the query. No retries: only transport failures are errors. Any HTTP answer,
    /// including 4xx/5xx, comes back as a stream so its body is relayed like any other.
    pub async fn send(
        &self,
        query: &BackendQuery,
        trace: &TraceContext,
    ) -> Result<ResponseStream, RelayError> {
        let url = self
            .url
            .as_deref()
            .ok_or(RelayError::ConfigurationMissing("backend url (BACKEND_URL)"))?;
        let body = serde_json::to_vec(query)?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        trace.inject_headers(&mut headers);
        let res = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await?;
        let status = res.status();
        let body = res
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(ResponseStream {
            status,
            body: Box::pin(body),
        })
    }
}
