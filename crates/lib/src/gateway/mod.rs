//! Gateway side of the relay: event types, the listener that consumes them, and the
//! process wiring that connects Slack, the backend and the listener.

mod listener;
mod protocol;
mod server;

pub use listener::{
    Listener, ListenerOptions, ListenerReport, ListenerState, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_PROCESSING_MESSAGE,
};
pub use protocol::{EventFeed, GatewayEnvelope, GatewayEvent, MentionEvent};
pub use server::run_relay;
