use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Typed event produced from one SSE message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Cumulative completion so far, thinking prefix included.
    Completion {
        text: String,
        stop_reason: Option<String>,
        content: Vec<MessagePart>,
    },
    /// Backend reported a failure; ends the request.
    Error { message: String },
    /// Normal end of the request.
    Done,
}

impl ProtocolEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    ToolCall { tool_call: ToolCall },
}

/// Fully merged tool call as of the latest event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// `data:` payload of a `completion` event.
///
/// `completion` carries a full snapshot for api-version < 2, `deltaText` an
/// incremental fragment for api-version >= 2.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionPayload {
    #[serde(default)]
    pub completion: Option<String>,
    #[serde(default, rename = "deltaText")]
    pub delta_text: Option<String>,
    #[serde(default, rename = "stopReason")]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub delta_thinking: Option<String>,
    #[serde(default)]
    pub delta_tool_calls: Option<Vec<ToolCallDelta>>,
}

/// `data:` payload of an `error` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
}

/// Streamed fragment of a tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub function: FunctionCallDelta,
}

impl ToolCallDelta {
    pub fn with_id(id: impl Into<String>, name: Option<&str>, arguments: &str) -> Self {
        Self {
            id: Some(id.into()),
            kind: Some("function".to_string()),
            function: FunctionCallDelta {
                name: name.map(str::to_string),
                arguments: Some(Value::String(arguments.to_string())),
            },
        }
    }

    pub fn continuation(arguments: &str) -> Self {
        Self {
            id: None,
            kind: None,
            function: FunctionCallDelta {
                name: None,
                arguments: Some(Value::String(arguments.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl FunctionCallDelta {
    /// Argument text carried by this fragment. Some backends send a JSON
    /// object instead of a string; it is serialized back to text.
    pub fn arguments_fragment(&self) -> Option<Cow<'_, str>> {
        match self.arguments.as_ref()? {
            Value::String(text) => Some(Cow::Borrowed(text)),
            Value::Null => None,
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}
