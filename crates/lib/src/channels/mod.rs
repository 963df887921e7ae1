//! Communication channels (Slack).
//!
//! `ChannelHandle` is the outbound capability the relay posts through; the Slack
//! connector also provides the Socket Mode feed the listener reads from.

mod handle;
mod inbound;
mod slack;

pub use handle::ChannelHandle;
pub use inbound::InboundMention;
pub use slack::{slack_api_base, SlackChannel, SocketEnvelope, SocketModeFeed};
