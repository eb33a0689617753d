use crate::sse::FrameDecodeError;

/// A message block that cannot be turned into a [`ProtocolEvent`](super::ProtocolEvent).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameParseError {
    #[error("cannot parse event type: {line:?}")]
    MalformedEventLine { line: String },
    #[error("unexpected event type: {0}")]
    UnknownEventType(String),
    #[error("missing data line for `{event}` event")]
    MissingData { event: &'static str },
    #[error("invalid JSON in `{event}` event: {message}")]
    InvalidJson { event: &'static str, message: String },
    #[error("invalid error event: missing `error` message")]
    EmptyErrorMessage,
}

/// Failure of a completion event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionStreamError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("completion request failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed completion stream: {0}")]
    Frame(#[from] FrameParseError),
    #[error("completion stream ended before a terminal event")]
    UnexpectedEnd,
}

impl CompletionStreamError {
    /// Whether repeating the request may succeed. Malformed payloads and
    /// client errors are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::UnexpectedEnd => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Frame(_) => false,
        }
    }
}

impl From<FrameDecodeError> for CompletionStreamError {
    fn from(error: FrameDecodeError) -> Self {
        match error {
            FrameDecodeError::Transport(message) => Self::Transport(message),
        }
    }
}
