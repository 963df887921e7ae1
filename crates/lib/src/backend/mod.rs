//! Backend query service: HTTP client, response frame parser, and a local mock server.

mod client;
mod frames;
pub mod mock;

pub use client::{BackendClient, BackendQuery, ByteStream, ResponseStream};
pub use frames::{parse_frames, FrameDecoder, ResponseFrame};
