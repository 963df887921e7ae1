//! Event listener: single consumer of the gateway feed.
//!
//! Acks first, filters mentions, then spawns a task that posts the "processing" message
//! and runs the forward, and goes straight back to the feed. Nothing on the consumer
//! loop waits on the chat channel. In-flight forwards are capped by a semaphore; past
//! the cap a mention is rejected rather than queued.

use crate::channels::{ChannelHandle, InboundMention};
use crate::error::RelayError;
use crate::forwarder::Forwarder;
use crate::gateway::protocol::{EventFeed, GatewayEvent, MentionEvent};
use crate::trace::Span;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_PROCESSING_MESSAGE: &str = "Processing your request...";
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;
const MAX_IN_FLIGHT_CEILING: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Stopped,
}

/// Counters for one `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerReport {
    pub events: u64,
    pub mentions: u64,
    pub dispatched: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub processing_message: String,
    pub max_in_flight: usize,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            processing_message: DEFAULT_PROCESSING_MESSAGE.to_string(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

pub struct Listener {
    forwarder: Arc<Forwarder>,
    channel: Arc<dyn ChannelHandle>,
    processing_message: String,
    max_in_flight: usize,
    permits: Arc<Semaphore>,
    /// Spawned forwards and rejection notices, joined on drain.
    tasks: JoinSet<()>,
    state: ListenerState,
}

impl Listener {
    /// Posts go through the forwarder's channel.
    pub fn new(forwarder: Arc<Forwarder>, options: ListenerOptions) -> Self {
        let max_in_flight = options.max_in_flight.clamp(1, MAX_IN_FLIGHT_CEILING);
        Self {
            channel: forwarder.channel().clone(),
            forwarder,
            processing_message: options.processing_message,
            max_in_flight,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            tasks: JoinSet::new(),
            state: ListenerState::Stopped,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Forwards currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Consume the feed until it closes or fails, then wait for in-flight forwards.
    pub async fn run<F>(&mut self, feed: &mut F) -> Result<ListenerReport>
    where
        F: EventFeed + ?Sized,
    {
        self.state = ListenerState::Listening;
        log::info!("listener: listening (max {} forwards in flight)", self.max_in_flight);
        let mut report = ListenerReport::default();

        let result = loop {
            let envelope = match feed.next_event().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            report.events += 1;
            self.reap();

            if let Some(ack_id) = envelope.ack_id.as_deref() {
                if let Err(e) = feed.ack(ack_id).await {
                    log::warn!("listener: ack {} failed: {:#}", ack_id, e);
                }
            }

            match envelope.event {
                GatewayEvent::Mention(mention) => {
                    report.mentions += 1;
                    if self.dispatch(mention) {
                        report.dispatched += 1;
                    } else {
                        report.rejected += 1;
                    }
                }
                GatewayEvent::Other { kind } => {
                    log::debug!("listener: ignored {} event", kind);
                }
            }
        };

        self.state = ListenerState::Stopped;
        match &result {
            Ok(()) => log::info!("listener: feed closed, stopping"),
            Err(e) => log::error!("listener: feed failed, stopping: {:#}", e),
        }
        self.drain().await;
        result.map(|()| report)
    }

    /// Returns false when the mention was rejected by admission control.
    fn dispatch(&mut self, event: MentionEvent) -> bool {
        log::info!(
            "listener: mention from {} in {}",
            event.user_id,
            event.conversation_id
        );
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                let err = RelayError::Overloaded {
                    limit: self.max_in_flight,
                };
                log::warn!("listener: rejecting mention in {}: {}", event.conversation_id, err);
                let forwarder = self.forwarder.clone();
                self.tasks.spawn(async move {
                    forwarder.notify_failure(&event.conversation_id).await;
                });
                return false;
            }
        };

        let mut span = Span::root("mention");
        span.set_attribute("user_id", event.user_id.clone());
        span.set_attribute("conversation_id", event.conversation_id.clone());
        let mention = InboundMention {
            user_id: event.user_id,
            conversation_id: event.conversation_id,
            text: event.text,
            trace: span.context(),
        };
        let channel = self.channel.clone();
        let processing_message = self.processing_message.clone();
        let forwarder = self.forwarder.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = channel
                .send_message(&mention.conversation_id, &processing_message)
                .await
            {
                log::warn!("listener: {}", RelayError::AcknowledgmentFailure(e));
            }
            if let Err(e) = forwarder.forward(mention).await {
                span.record_error(&e);
            }
        });
        true
    }

    /// Drop finished tasks so the set does not grow with the feed.
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                log::error!("listener: forward task failed: {}", e);
            }
        }
    }

    /// Wait for every spawned forward and notice to finish.
    async fn drain(&mut self) {
        if !self.tasks.is_empty() {
            log::info!("listener: waiting for {} task(s) to finish", self.tasks.len());
        }
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("listener: forward task failed: {}", e);
            }
        }
    }
}
