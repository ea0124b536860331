use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit of streaming output from the Response Processor and the Thread
/// Manager. Every event is JSON-serializable; on the wire it carries a
/// `type` discriminator plus per-type payload fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Content { content: String },
    ToolStarted { name: String, arguments: Value },
    ToolResult { name: String, result: String },
    Status { status: String, #[serde(skip_serializing_if = "Option::is_none")] status_type: Option<String>, #[serde(skip_serializing_if = "Option::is_none")] message: Option<String> },
    Finish { finish_reason: String },
    Error { message: String },
}

impl Event {
    pub fn content(text: impl Into<String>) -> Self {
        Event::Content { content: text.into() }
    }

    pub fn tool_started(name: impl Into<String>, arguments: Value) -> Self {
        Event::ToolStarted { name: name.into(), arguments }
    }

    pub fn tool_result(name: impl Into<String>, result: impl Into<String>) -> Self {
        Event::ToolResult { name: name.into(), result: result.into() }
    }

    pub fn status(status: impl Into<String>) -> Self {
        Event::Status { status: status.into(), status_type: None, message: None }
    }

    pub fn status_with(status: impl Into<String>, status_type: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Status {
            status: status.into(),
            status_type: Some(status_type.into()),
            message: Some(message.into()),
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Event::Finish { finish_reason: reason.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::Error { message: message.into() }
    }

    /// True for the events that legally end a run's stream (§8: the last
    /// event is a `status(completed|stopped|error)`, never a bare `finish`).
    pub fn is_terminal_status(&self) -> bool {
        matches!(self, Event::Status { status, .. } if status == "completed" || status == "stopped" || status == "error")
    }
}
