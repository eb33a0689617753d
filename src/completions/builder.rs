//! Folds streamed completion payloads into cumulative output.
//!
//! One [`CompletionsResponseBuilder`] lives for one logical request. For each
//! `completion` event the steps must run in this order:
//!
//! 1. [`next_thinking`](CompletionsResponseBuilder::next_thinking)
//! 2. [`next_tool_calls`](CompletionsResponseBuilder::next_tool_calls)
//! 3. [`next_completion`](CompletionsResponseBuilder::next_completion)
//!
//! [`apply`](CompletionsResponseBuilder::apply) performs all three for a
//! decoded payload. Out-of-order calls trip a debug assertion.

use super::types::{CompletionPayload, ToolCall, ToolCallDelta};
use indexmap::IndexMap;
use tracing::debug;
use url::Url;

/// Query parameter selecting the completion payload shape.
pub const API_VERSION_PARAM: &str = "api-version";

/// First api-version that streams incremental `deltaText` fragments.
pub const DELTA_API_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderStage {
    #[default]
    Idle,
    Thinking,
    ToolCalls,
    Completion,
}

impl BuilderStage {
    #[inline]
    const fn valid_predecessors(self) -> &'static [BuilderStage] {
        match self {
            BuilderStage::Idle => &[],
            BuilderStage::Thinking => &[
                BuilderStage::Idle,
                BuilderStage::Thinking,
                BuilderStage::Completion,
            ],
            BuilderStage::ToolCalls => &[
                BuilderStage::Idle,
                BuilderStage::Thinking,
                BuilderStage::ToolCalls,
                BuilderStage::Completion,
            ],
            BuilderStage::Completion => &[
                BuilderStage::Idle,
                BuilderStage::Thinking,
                BuilderStage::ToolCalls,
                BuilderStage::Completion,
            ],
        }
    }

    #[inline]
    fn can_follow(self, previous: BuilderStage) -> bool {
        self.valid_predecessors().contains(&previous)
    }
}

#[derive(Debug, Clone, Default)]
struct ToolCallState {
    name: String,
    arguments: String,
}

/// Output of one [`CompletionsResponseBuilder::apply`] step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionFrame {
    /// Thinking prefix followed by the cumulative text.
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionsResponseBuilder {
    api_version: u32,
    total_completion: String,
    thinking_fragments: Vec<String>,
    tool_calls: IndexMap<String, ToolCallState>,
    last_tool_call_id: Option<String>,
    stage: BuilderStage,
}

impl CompletionsResponseBuilder {
    pub fn new(api_version: u32) -> Self {
        Self {
            api_version,
            ..Self::default()
        }
    }

    /// Build from the request URL. A missing or unparsable `api-version`
    /// selects version 0.
    pub fn from_url(url: &Url) -> Self {
        let api_version = url
            .query_pairs()
            .find(|(key, _)| key == API_VERSION_PARAM)
            .and_then(|(_, value)| value.trim().parse::<u32>().ok())
            .unwrap_or(0);
        Self::new(api_version)
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn uses_deltas(&self) -> bool {
        self.api_version >= DELTA_API_VERSION
    }

    /// Cumulative completion text without the thinking prefix.
    pub fn text(&self) -> &str {
        &self.total_completion
    }

    fn advance(&mut self, next: BuilderStage) {
        debug_assert!(
            next.can_follow(self.stage),
            "Invalid builder call order: {:?} -> {:?}",
            self.stage,
            next
        );
        self.stage = next;
    }

    /// Fold this step's text and return `thinking prefix + cumulative text`.
    ///
    /// Delta mode appends `delta_text`; snapshot mode replaces the text with
    /// `full_text` when one is present.
    pub fn next_completion(&mut self, full_text: Option<&str>, delta_text: Option<&str>) -> String {
        self.advance(BuilderStage::Completion);

        if self.uses_deltas() {
            if let Some(delta) = delta_text {
                self.total_completion.push_str(delta);
            }
        } else if let Some(snapshot) = full_text {
            snapshot.clone_into(&mut self.total_completion);
        }

        let mut output = self.thinking_prefix();
        output.push_str(&self.total_completion);
        output
    }

    /// Record a thinking fragment and return the current thinking prefix.
    pub fn next_thinking(&mut self, delta_thinking: Option<&str>) -> String {
        self.advance(BuilderStage::Thinking);

        if let Some(delta) = delta_thinking.filter(|delta| !delta.is_empty()) {
            self.thinking_fragments.push(delta.to_string());
        }
        self.thinking_prefix()
    }

    /// `<think>…</think>\n` once any thinking arrived, else empty.
    pub fn thinking_prefix(&self) -> String {
        if self.thinking_fragments.is_empty() {
            return String::new();
        }
        format!("<think>{}</think>\n", self.thinking_fragments.concat())
    }

    /// Merge tool-call fragments and return every call seen so far, in
    /// first-seen order.
    pub fn next_tool_calls(&mut self, deltas: &[ToolCallDelta]) -> Vec<ToolCall> {
        self.advance(BuilderStage::ToolCalls);

        for delta in deltas {
            let fragment = delta.function.arguments_fragment();

            let target_id = match delta.id.as_deref() {
                Some(id) => {
                    let call = self.tool_calls.entry(id.to_string()).or_default();
                    if let Some(name) = delta.function.name.as_deref() {
                        name.clone_into(&mut call.name);
                    }
                    self.last_tool_call_id = Some(id.to_string());
                    id
                }
                None => match self.last_tool_call_id.as_deref() {
                    Some(last) => last,
                    None => {
                        debug!("dropping tool call fragment without an id before any tool call");
                        continue;
                    }
                },
            };

            if let (Some(fragment), Some(call)) = (fragment, self.tool_calls.get_mut(target_id)) {
                call.arguments.push_str(&fragment);
            }
        }

        self.tool_calls()
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .map(|(id, call)| ToolCall {
                id: id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .collect()
    }

    /// Run the thinking, tool-call and completion steps for one payload.
    pub fn apply(&mut self, payload: &CompletionPayload) -> CompletionFrame {
        self.next_thinking(payload.delta_thinking.as_deref());
        let tool_calls = self.next_tool_calls(payload.delta_tool_calls.as_deref().unwrap_or_default());
        let text = self.next_completion(payload.completion.as_deref(), payload.delta_text.as_deref());
        CompletionFrame { text, tool_calls }
    }
}
