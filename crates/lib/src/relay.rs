//! Response relay: one outbound chat message per frame, strictly in arrival order.
//!
//! Posting is best-effort per frame. A failed post is logged and counted and the next
//! frame is still relayed. A parser error ends the relay.

use crate::backend::ResponseFrame;
use crate::channels::ChannelHandle;
use crate::error::RelayError;
use futures_util::{Stream, StreamExt};

/// What a relay managed to deliver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    pub frames_posted: u64,
    pub frames_failed: u64,
    /// The last frame was flushed from an incomplete buffer.
    pub truncated: bool,
}

/// Relays frames for one conversation. The outcome stays readable after `run` is
/// interrupted (timeout, error), so callers know how much was delivered.
pub struct ResponseRelay<'a> {
    conversation_id: &'a str,
    channel: &'a dyn ChannelHandle,
    outcome: RelayOutcome,
}

impl<'a> ResponseRelay<'a> {
    pub fn new(conversation_id: &'a str, channel: &'a dyn ChannelHandle) -> Self {
        Self {
            conversation_id,
            channel,
            outcome: RelayOutcome::default(),
        }
    }

    /// Consume `frames` until exhausted or a stream error arrives.
    pub async fn run<S>(&mut self, frames: S) -> Result<(), RelayError>
    where
        S: Stream<Item = Result<ResponseFrame, RelayError>>,
    {
        futures_util::pin_mut!(frames);
        while let Some(item) = frames.next().await {
            let frame = item?;
            log::debug!(
                "relay: frame {} for {} ({} bytes)",
                frame.sequence,
                self.conversation_id,
                frame.payload.len()
            );
            if frame.truncated {
                self.outcome.truncated = true;
            }
            match self
                .channel
                .send_message(self.conversation_id, &frame.payload)
                .await
            {
                Ok(()) => self.outcome.frames_posted += 1,
                Err(reason) => {
                    self.outcome.frames_failed += 1;
                    let err = RelayError::RelayPostFailure {
                        sequence: frame.sequence,
                        reason,
                    };
                    log::warn!("relay: {}", err);
                }
            }
        }
        Ok(())
    }

    pub fn outcome(&self) -> &RelayOutcome {
        &self.outcome
    }

    pub fn into_outcome(self) -> RelayOutcome {
        self.outcome
    }
}
