//! Turns buffered SSE text into typed [`ProtocolEvent`]s.

use super::builder::CompletionsResponseBuilder;
use super::error::FrameParseError;
use super::types::{CompletionPayload, ErrorPayload, MessagePart, ProtocolEvent};
use crate::sse::{RawMessage, find_frame_boundary};
use serde::de::DeserializeOwned;

const EVENT_LINE_PREFIX: &str = "event: ";
const DATA_LINE_PREFIX: &str = "data:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Completion,
    Error,
    Done,
}

impl EventType {
    pub fn parse(name: &str) -> Result<Self, FrameParseError> {
        match name {
            "completion" => Ok(Self::Completion),
            "error" => Ok(Self::Error),
            "done" => Ok(Self::Done),
            other => Err(FrameParseError::UnknownEventType(other.to_string())),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

/// Events parsed from a buffer plus the unterminated tail to carry over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvents {
    pub events: Vec<ProtocolEvent>,
    pub remaining_buffer: String,
}

/// A parse error together with the events produced before it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct ParseFailure {
    pub events: Vec<ProtocolEvent>,
    #[source]
    pub error: FrameParseError,
}

/// Parse every complete message in `buffer`.
///
/// A partial trailing block is returned untouched in
/// [`ParsedEvents::remaining_buffer`]. The first malformed block aborts the
/// call; events parsed before it are handed back in [`ParseFailure::events`].
pub fn parse_events(
    builder: &mut CompletionsResponseBuilder,
    buffer: &str,
) -> Result<ParsedEvents, ParseFailure> {
    let mut events = Vec::new();
    let mut rest = buffer;

    while let Some((split_idx, delimiter_len)) = find_frame_boundary(rest) {
        let (block, tail) = rest.split_at(split_idx);
        match parse_block(builder, block) {
            Ok(event) => events.push(event),
            Err(error) => return Err(ParseFailure { events, error }),
        }
        rest = tail.get(delimiter_len..).unwrap_or_default();
    }

    Ok(ParsedEvents {
        events,
        remaining_buffer: rest.to_string(),
    })
}

/// Parse one block of the form `event: <name>\ndata: <json>`.
pub fn parse_block(
    builder: &mut CompletionsResponseBuilder,
    block: &str,
) -> Result<ProtocolEvent, FrameParseError> {
    let mut lines = block.lines();
    let event_line = lines.next().unwrap_or_default();
    let name = event_line
        .strip_prefix(EVENT_LINE_PREFIX)
        .ok_or_else(|| FrameParseError::MalformedEventLine {
            line: event_line.to_string(),
        })?;
    let event_type = EventType::parse(name.trim_end_matches('\r'))?;

    let data = lines.next().and_then(|line| {
        line.strip_prefix(DATA_LINE_PREFIX)
            .map(|value| {
                let value = value.strip_prefix(' ').unwrap_or(value);
                value.trim_end_matches('\r')
            })
    });

    interpret(builder, event_type, data)
}

/// Interpret an already framed message.
pub fn parse_message(
    builder: &mut CompletionsResponseBuilder,
    message: &RawMessage,
) -> Result<ProtocolEvent, FrameParseError> {
    let event_type = EventType::parse(&message.event)?;
    interpret(builder, event_type, Some(message.data.as_str()))
}

fn interpret(
    builder: &mut CompletionsResponseBuilder,
    event_type: EventType,
    data: Option<&str>,
) -> Result<ProtocolEvent, FrameParseError> {
    match event_type {
        EventType::Completion => {
            let payload: CompletionPayload = parse_json(event_type, data)?;
            let frame = builder.apply(&payload);

            let mut content = Vec::with_capacity(frame.tool_calls.len() + 1);
            if !frame.text.is_empty() {
                content.push(MessagePart::Text {
                    text: frame.text.clone(),
                });
            }
            content.extend(
                frame
                    .tool_calls
                    .into_iter()
                    .map(|tool_call| MessagePart::ToolCall { tool_call }),
            );

            Ok(ProtocolEvent::Completion {
                text: frame.text,
                stop_reason: payload.stop_reason,
                content,
            })
        }
        EventType::Error => {
            let payload: ErrorPayload = parse_json(event_type, data)?;
            match payload.error {
                Some(message) if !message.is_empty() => Ok(ProtocolEvent::Error { message }),
                _ => Err(FrameParseError::EmptyErrorMessage),
            }
        }
        EventType::Done => Ok(ProtocolEvent::Done),
    }
}

fn parse_json<T: DeserializeOwned>(
    event_type: EventType,
    data: Option<&str>,
) -> Result<T, FrameParseError> {
    let data = data.ok_or(FrameParseError::MissingData {
        event: event_type.as_str(),
    })?;
    serde_json::from_str(data).map_err(|err| FrameParseError::InvalidJson {
        event: event_type.as_str(),
        message: err.to_string(),
    })
}
