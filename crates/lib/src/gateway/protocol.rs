//! Gateway event types and the feed seam the listener consumes.

use anyhow::Result;
use async_trait::async_trait;

/// Bot was referenced in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEvent {
    pub user_id: String,
    pub conversation_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Mention(MentionEvent),
    /// Anything else the gateway delivers; logged and ignored.
    Other { kind: String },
}

/// One delivery from the gateway. `ack_id` is set when the gateway expects an
/// acknowledgment for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEnvelope {
    pub ack_id: Option<String>,
    pub event: GatewayEvent,
}

/// Long-lived subscription to the gateway's event feed. Read by exactly one consumer.
#[async_trait]
pub trait EventFeed: Send {
    /// Next envelope. `Ok(None)` means the feed is closed for good; `Err` is fatal.
    async fn next_event(&mut self) -> Result<Option<GatewayEnvelope>>;

    /// Acknowledge a delivered envelope.
    async fn ack(&mut self, ack_id: &str) -> Result<()>;
}
