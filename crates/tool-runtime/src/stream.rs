use serde::{Deserialize, Serialize};

/// One chunk of a provider's native stream. Provider-agnostic — translated
/// from the concrete wire format (OpenAI-style SSE deltas, etc.) in the
/// provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StreamEvent {
    /// A chunk of assistant text.
    TextDelta { text: String },
    /// Start of a native tool call, keyed by the provider's per-response index.
    ToolCallStart { index: u32, id: String, name: String },
    /// Incremental JSON argument text for a tool call, keyed by index.
    ToolCallDelta { index: u32, arguments_delta: String },
    /// The response is complete.
    MessageEnd { stop_reason: StopReason },
}

/// The provider's own reason for ending the response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolCalls,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolCalls => "tool_calls",
            StopReason::MaxTokens => "max_tokens",
            StopReason::StopSequence => "stop_sequence",
        }
    }
}
