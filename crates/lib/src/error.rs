//! Errors raised inside a single forward (mention → backend → conversation).
//!
//! None of these are fatal to the process: the forward that produced one logs it,
//! records it on its span and stops. The listener never sees them.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The "processing" message could not be posted. The mention is still forwarded.
    #[error("acknowledgment message failed: {0}")]
    AcknowledgmentFailure(String),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    #[error("could not encode backend request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connect, send or body read failure talking to the backend. Reported, never retried.
    #[error("backend transport error: {0}")]
    Transport(String),

    /// Byte stream ended mid-frame; the partial payload was flushed as frame `sequence`.
    #[error("response stream truncated at frame {sequence}")]
    StreamTruncated { sequence: u64 },

    #[error("posting frame {sequence} failed: {reason}")]
    RelayPostFailure { sequence: u64, reason: String },

    #[error("forward exceeded {0:?}")]
    Timeout(Duration),

    #[error("too many forwards in flight (limit {limit})")]
    Overloaded { limit: usize },
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

impl RelayError {
    /// Short stable name, used as the span status and in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::AcknowledgmentFailure(_) => "acknowledgment_failure",
            RelayError::ConfigurationMissing(_) => "configuration_missing",
            RelayError::Serialization(_) => "serialization_error",
            RelayError::Transport(_) => "transport_error",
            RelayError::StreamTruncated { .. } => "stream_truncated",
            RelayError::RelayPostFailure { .. } => "relay_post_failure",
            RelayError::Timeout(_) => "timeout",
            RelayError::Overloaded { .. } => "overloaded",
        }
    }
}
