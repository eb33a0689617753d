//! Streaming completion protocol: `completion`, `error` and `done` events
//! folded into cumulative responses.

mod builder;
mod error;
mod parser;
mod stream;
mod types;

pub use builder::{
    API_VERSION_PARAM, BuilderStage, CompletionFrame, CompletionsResponseBuilder,
    DELTA_API_VERSION,
};
pub use error::{CompletionStreamError, FrameParseError};
pub use parser::{EventType, ParseFailure, ParsedEvents, parse_block, parse_events, parse_message};
pub use stream::{CompletionEventStream, completion_events, completion_events_from_response};
pub use types::{
    CompletionPayload, ErrorPayload, FunctionCallDelta, MessagePart, ProtocolEvent, ToolCall,
    ToolCallDelta,
};
