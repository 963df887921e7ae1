//! ChatRelay core library: Slack mention listener, backend forwarder, streamed
//! response relay, and the mock backend used by the CLI.

pub mod backend;
pub mod channels;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod gateway;
pub mod init;
pub mod relay;
pub mod telemetry;
pub mod trace;
