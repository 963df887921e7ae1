//! Frame parser for the backend's server-push stream.
//!
//! Wire format, one frame:
//!
//! ```text
//! id: 3
//! data: payload text
//!
//! ```
//!
//! Bytes are buffered until a blank line (`\n\n`, or `\n\r\n` for CRLF streams) has been
//! seen in full, so the frames produced do not depend on how the transport chunked the
//! body. Whatever is left in the buffer when the stream ends is flushed as one final
//! frame marked `truncated`.

use crate::error::RelayError;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

/// One unit of incremental backend output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// `id:` value when present, otherwise previous sequence + 1. Starts at 1.
    pub sequence: u64,
    pub payload: String,
    /// Flushed from an incomplete trailing buffer rather than closed by a blank line.
    pub truncated: bool,
}

/// Incremental decoder: push raw bytes, pull complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Buffer offset from which the next terminator search resumes.
    scanned: usize,
    last_sequence: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for a terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, if a full terminator is buffered. Blocks without a `data:`
    /// line (comments, bare ids, stray blank lines) are consumed and skipped.
    pub fn next_frame(&mut self) -> Option<ResponseFrame> {
        loop {
            let Some((end, terminator_len)) = find_blank_line(&self.buffer, self.scanned) else {
                self.scanned = self.buffer.len().saturating_sub(2);
                return None;
            };
            let block: Vec<u8> = self.buffer.drain(..end + terminator_len).collect();
            self.scanned = 0;
            let fields = BlockFields::parse(&block[..end]);
            if let Some(payload) = fields.data {
                return Some(self.frame(fields.id, payload, false));
            }
        }
    }

    /// End of stream: flush leftover bytes as a final truncated frame. Returns `None`
    /// when nothing but line terminators remain.
    pub fn finish(&mut self) -> Option<ResponseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if rest.iter().all(|&b| b == b'\n' || b == b'\r') {
            return None;
        }
        let fields = BlockFields::parse(&rest);
        let payload = match fields.data {
            Some(data) => data,
            None => String::from_utf8_lossy(&rest)
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        };
        Some(self.frame(fields.id, payload, true))
    }

    fn frame(&mut self, id: Option<u64>, payload: String, truncated: bool) -> ResponseFrame {
        let sequence = id.unwrap_or_else(|| self.last_sequence.saturating_add(1));
        self.last_sequence = sequence;
        ResponseFrame {
            sequence,
            payload,
            truncated,
        }
    }
}

/// Position of the `\n` that ends the last line of a block, and the terminator length
/// (2 for `\n\n`, 3 for `\n\r\n`).
fn find_blank_line(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match (buf.get(i + 1), buf.get(i + 2)) {
                (Some(b'\n'), _) => return Some((i, 2)),
                (Some(b'\r'), Some(b'\n')) => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

struct BlockFields {
    id: Option<u64>,
    data: Option<String>,
}

impl BlockFields {
    fn parse(block: &[u8]) -> Self {
        let text = String::from_utf8_lossy(block);
        let mut id = None;
        let mut data: Option<String> = None;
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "data" => match data.as_mut() {
                    Some(d) => {
                        d.push('\n');
                        d.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                "id" => id = value.trim().parse::<u64>().ok().filter(|n| *n > 0),
                _ => {}
            }
        }
        Self { id, data }
    }
}

struct ParseState<S> {
    body: S,
    decoder: FrameDecoder,
    done: bool,
    pending_error: Option<RelayError>,
}

/// Lazily decode a response body into frames.
///
/// A clean end of stream finishes the sequence (after the truncated leftover frame, if
/// any). A transport error flushes the leftover as a truncated frame first, then yields
/// `Err(RelayError::Transport)` and ends.
pub fn parse_frames<S, E>(body: S) -> impl Stream<Item = Result<ResponseFrame, RelayError>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let state = ParseState {
        body,
        decoder: FrameDecoder::new(),
        done: false,
        pending_error: None,
    };
    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.decoder.next_frame() {
                return Some((Ok(frame), st));
            }
            if let Some(err) = st.pending_error.take() {
                return Some((Err(err), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(chunk)) => st.decoder.push(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    let err = RelayError::Transport(e.to_string());
                    if let Some(frame) = st.decoder.finish() {
                        log::warn!("stream read failed mid-frame, flushing partial frame {}", frame.sequence);
                        st.pending_error = Some(err);
                        return Some((Ok(frame), st));
                    }
                    return Some((Err(err), st));
                }
                None => {
                    st.done = true;
                    if let Some(frame) = st.decoder.finish() {
                        log::warn!("{}", RelayError::StreamTruncated { sequence: frame.sequence });
                        return Some((Ok(frame), st));
                    }
                    return None;
                }
            }
        }
    })
}
