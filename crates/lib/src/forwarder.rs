//! Forwarder: turns one mention into a backend request and relays the streamed answer.
//!
//! Every failure stays inside the forward that produced it: it is logged, recorded on
//! the forward span, and optionally reported to the conversation (failure notice). The
//! response body is owned by the forward future, so it is closed on every exit path,
//! including timeout.

use crate::backend::{parse_frames, BackendClient};
use crate::channels::{ChannelHandle, InboundMention};
use crate::error::RelayError;
use crate::relay::{RelayOutcome, ResponseRelay};
use crate::trace::{Span, TraceContext};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    /// Upper bound on one forward, from request to last frame.
    pub forward_timeout: Duration,
    /// Posted to the conversation when a forward fails before delivering any frame.
    /// `None` keeps failures silent.
    pub failure_notice: Option<String>,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self {
            forward_timeout: Duration::from_secs(300),
            failure_notice: None,
        }
    }
}

pub struct Forwarder {
    backend: BackendClient,
    channel: Arc<dyn ChannelHandle>,
    options: ForwarderOptions,
}

impl Forwarder {
    pub fn new(
        backend: BackendClient,
        channel: Arc<dyn ChannelHandle>,
        options: ForwarderOptions,
    ) -> Self {
        Self {
            backend,
            channel,
            options,
        }
    }

    /// Forward one mention. Never retries.
    pub async fn forward(&self, mention: InboundMention) -> Result<RelayOutcome, RelayError> {
        let mut span = Span::child_of("forward", &mention.trace);
        span.set_attribute("user_id", mention.user_id.clone());
        span.set_attribute("conversation_id", mention.conversation_id.clone());

        let budget = self.options.forward_timeout;
        let trace = span.context();
        let mut relay = ResponseRelay::new(&mention.conversation_id, self.channel.as_ref());
        let result = match tokio::time::timeout(
            budget,
            self.forward_inner(&mention, &trace, &mut relay),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(RelayError::Timeout(budget)),
        };
        let outcome = relay.into_outcome();

        span.set_attribute("frames_posted", outcome.frames_posted as i64);
        span.set_attribute("frames_failed", outcome.frames_failed as i64);
        if outcome.truncated {
            span.set_attribute("truncated", true);
        }
        match result {
            Ok(()) => {
                log::info!(
                    "forward for {} done: {} frame(s) posted, {} failed",
                    mention.conversation_id,
                    outcome.frames_posted,
                    outcome.frames_failed
                );
                Ok(outcome)
            }
            Err(e) => {
                span.record_error(&e);
                log::warn!(
                    "forward for {} failed ({}): {}",
                    mention.conversation_id,
                    e.kind(),
                    e
                );
                if outcome.frames_posted == 0 {
                    self.notify_failure(&mention.conversation_id).await;
                }
                Err(e)
            }
        }
    }

    async fn forward_inner(
        &self,
        mention: &InboundMention,
        trace: &TraceContext,
        relay: &mut ResponseRelay<'_>,
    ) -> Result<(), RelayError> {
        let Some(url) = self.backend.url() else {
            return Err(RelayError::ConfigurationMissing("backend url (BACKEND_URL)"));
        };
        let query = mention.to_query();

        let mut backend_span = Span::child_of("backend.send", trace);
        backend_span.set_attribute("http.url", url.to_string());
        let backend_trace = backend_span.context();
        let response = match self.backend.send(&query, &backend_trace).await {
            Ok(r) => r,
            Err(e) => {
                backend_span.record_error(&e);
                return Err(e);
            }
        };
        let status = response.status;
        backend_span.set_attribute("http.status", i64::from(status.as_u16()));
        if status.is_client_error() || status.is_server_error() {
            backend_span.set_error_status(format!("backend answered {}", status));
            log::warn!("backend answered {}, relaying its body", status);
        } else {
            log::info!("sent to backend, status {}", status);
        }

        let result = relay.run(parse_frames(response.body)).await;
        if let Err(e) = &result {
            backend_span.record_error(e);
        }
        result
    }

    /// Post the configured failure notice, if any. Best-effort.
    pub async fn notify_failure(&self, conversation_id: &str) {
        let Some(notice) = self.options.failure_notice.as_deref() else {
            return;
        };
        if let Err(e) = self.channel.send_message(conversation_id, notice).await {
            log::warn!("failure notice to {} not delivered: {}", conversation_id, e);
        }
    }

    pub fn channel(&self) -> &Arc<dyn ChannelHandle> {
        &self.channel
    }
}
