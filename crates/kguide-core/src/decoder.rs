//! Reassembles `data: <json>` records from an arbitrarily chunked body.
//!
//! Chunks are buffered as raw bytes and only split on `\n`, so a record (or a
//! multi-byte UTF-8 character) cut in half by the transport is rejoined before
//! it is parsed.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::event::StreamEvent;

const DATA_PREFIX: &[u8] = b"data: ";

/// Incremental line splitter holding the unterminated tail between chunks.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(event) = decode_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        events
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Decodes one complete line. Lines without the `data: ` prefix and records
/// that fail to parse yield `None`.
pub fn decode_line(line: &[u8]) -> Option<StreamEvent> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;

    match parse_record(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!("skipping {err}");
            None
        }
    }
}

pub fn parse_record(payload: &[u8]) -> Result<StreamEvent, ChatError> {
    serde_json::from_slice(payload).map_err(|source| ChatError::MalformedRecord {
        line: String::from_utf8_lossy(payload).into_owned(),
        source,
    })
}

struct DecodeState<S> {
    source: S,
    decoder: LineDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

/// Turns a byte-chunk stream into a lazy stream of events.
///
/// The next chunk is only pulled once every event of the previous one has
/// been consumed. A transport error is yielded once and ends the stream; a
/// partial line left when the source ends is dropped.
pub fn decode_stream<S, B, E>(source: S) -> impl Stream<Item = Result<StreamEvent, ChatError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
{
    let state = DecodeState {
        source,
        decoder: LineDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(chunk.as_ref());
                    state.ready.extend(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(err.into()), state));
                }
                None => {
                    state.finished = true;
                    if state.decoder.pending() > 0 {
                        debug!(
                            bytes = state.decoder.pending(),
                            "discarding unterminated trailing record"
                        );
                    }
                }
            }
        }
    })
}
