//! Outbound side of a channel: post text into a conversation.

use async_trait::async_trait;

/// Handle to a connected chat channel. Invoked concurrently from many forwards,
/// so implementations must be safe to share.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Post a plain-text message to a conversation (e.g. Slack channel id).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String>;
}
