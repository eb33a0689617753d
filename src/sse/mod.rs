//! Server-sent event framing.
//!
//! Turns a chunked response body into discrete [`RawMessage`]s. A message is a
//! block of `field: value` lines terminated by a blank line. Each line is split
//! on the first `:` and one leading space is dropped from the value, so event
//! names and payloads that contain `": "` are kept verbatim.

mod utf8;

pub use utf8::Utf8ChunkDecoder;

use async_stream::try_stream;
use ctxwire_config::StreamingConfig;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::pin::Pin;
use tracing::debug;

/// Event name used when a block carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

const COMPLETION_EVENT: &str = "completion";

/// One decoded SSE block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub event: String,
    pub data: String,
}

impl RawMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Render the message in wire form, terminator included.
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Drop a `completion` message when the next message decoded from the
    /// same read is also a `completion`. Callers opting in must tolerate
    /// losing intermediate chunks.
    pub aggregate_repeated_events: bool,
}

impl From<&StreamingConfig> for DecoderOptions {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            aggregate_repeated_events: config.aggregate_repeated_completions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("stream read failed: {0}")]
    Transport(String),
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawMessage, FrameDecodeError>> + Send>>;

/// Locate the next message terminator, returning its byte offset and length.
pub fn find_frame_boundary(buffer: &str) -> Option<(usize, usize)> {
    let newline_boundary = buffer.find("\n\n").map(|idx| (idx, 2));
    let carriage_boundary = buffer.find("\r\n\r\n").map(|idx| (idx, 4));

    match (newline_boundary, carriage_boundary) {
        (Some((n_idx, n_len)), Some((c_idx, c_len))) => {
            if n_idx <= c_idx {
                Some((n_idx, n_len))
            } else {
                Some((c_idx, c_len))
            }
        }
        (Some(boundary), None) => Some(boundary),
        (None, Some(boundary)) => Some(boundary),
        (None, None) => None,
    }
}

/// Parse one message block (terminator excluded). Returns `None` for blocks
/// that carry neither an event nor data, such as keep-alive comments.
pub fn parse_block(block: &str) -> Option<RawMessage> {
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;

    for raw_line in block.split('\n') {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            continue;
        }

        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    if event.is_none() && data.is_none() {
        return None;
    }

    Some(RawMessage {
        event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        data: data.unwrap_or_default(),
    })
}

/// Remove every complete message from `buffer`, leaving a trailing partial
/// block in place.
pub fn drain_messages(buffer: &mut String, options: DecoderOptions) -> Vec<RawMessage> {
    let mut batch = Vec::new();

    while let Some((split_idx, delimiter_len)) = find_frame_boundary(buffer) {
        let block: String = buffer.drain(..split_idx + delimiter_len).collect();
        if let Some(message) = parse_block(&block[..split_idx]) {
            batch.push(message);
        }
    }

    if options.aggregate_repeated_events {
        drop_superseded_completions(batch)
    } else {
        batch
    }
}

fn drop_superseded_completions(batch: Vec<RawMessage>) -> Vec<RawMessage> {
    let mut kept = Vec::with_capacity(batch.len());
    let mut messages = batch.into_iter().peekable();

    while let Some(message) = messages.next() {
        let superseded = message.event == COMPLETION_EVENT
            && messages
                .peek()
                .is_some_and(|next| next.event == COMPLETION_EVENT);
        if superseded {
            continue;
        }
        kept.push(message);
    }

    kept
}

/// Decode a chunked body into a stream of messages.
///
/// The returned stream owns `body`; dropping it (early `break`, cancellation,
/// or an error item) releases the underlying reader exactly once. A trailing
/// block without its terminator is discarded when the body ends.
pub fn decode_frames<S, B, E>(body: S, options: DecoderOptions) -> FrameStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let stream = try_stream! {
        let mut body = Box::pin(body);
        let mut decoder = Utf8ChunkDecoder::default();
        let mut buffer = String::new();

        while let Some(chunk_result) = body.next().await {
            let chunk = chunk_result
                .map_err(|err| FrameDecodeError::Transport(err.to_string()))?;

            buffer.push_str(&decoder.decode(chunk.as_ref()));

            for message in drain_messages(&mut buffer, options) {
                yield message;
            }
        }

        buffer.push_str(&decoder.finish());
        if !buffer.trim().is_empty() {
            debug!(
                trailing_bytes = buffer.len(),
                "discarding unterminated SSE block at end of stream"
            );
        }
    };

    Box::pin(stream)
}
