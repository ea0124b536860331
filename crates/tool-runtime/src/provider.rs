use crate::stream::StreamEvent;
use crate::tool::ToolDefinition;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// A message in the prompt sent to the provider, in the shape the Thread
/// Manager composes (role + already-string-encoded content).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderMessage {
    pub role: String,
    pub content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    Required,
    None,
}

/// Trait for LLM providers that support tool use and streaming. This trait
/// lives in tool-runtime (the consumer) rather than `crates/llm` (the
/// implementor), matching the dependency direction of traits defined at
/// their point of use.
#[async_trait]
pub trait ToolAwareLlmProvider: Send + Sync {
    async fn stream_with_tools(
        &self,
        messages: Vec<ProviderMessage>,
        system_prompt: Option<String>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>, LlmError>;

    /// Non-streaming convenience: collects the full response into one batch
    /// of `StreamEvent`s, as the Response Processor's non-streaming path
    /// expects (a single "chunk" representing the whole response).
    async fn complete_with_tools(
        &self,
        messages: Vec<ProviderMessage>,
        system_prompt: Option<String>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Vec<StreamEvent>, LlmError> {
        use futures::StreamExt;
        let stream = self
            .stream_with_tools(messages, system_prompt, tools, tool_choice, temperature, max_tokens)
            .await?;
        stream.collect::<Vec<_>>().await.into_iter().collect()
    }

    fn provider_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited")]
    RateLimited,
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider rejected request: {0}")]
    InvalidRequest(String),
    #[error("authentication failed")]
    AuthError,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimited | LlmError::Transient(_))
    }
}

/// Pre-scripted provider for tests and for running the server without
/// external credentials (`LLM_PROVIDER=mock`, the default). Responses are
/// queued FIFO and replayed one per call; once exhausted, returns a bare
/// `end_turn` with no content.
pub mod mock {
    use super::*;
    use crate::stream::StopReason;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub struct MockLlmProvider {
        responses: Mutex<VecDeque<Vec<StreamEvent>>>,
    }

    impl MockLlmProvider {
        pub fn new() -> Self {
            Self { responses: Mutex::new(VecDeque::new()) }
        }

        pub fn queue_response(&self, events: Vec<StreamEvent>) {
            self.responses.lock().unwrap().push_back(events);
        }

        pub fn queue_text(&self, text: &str) {
            self.queue_response(vec![
                StreamEvent::TextDelta { text: text.to_string() },
                StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn },
            ]);
        }

        /// Queue a response consisting of a single native tool call plus an
        /// end-of-message chunk announcing `tool_calls`.
        pub fn queue_tool_call(&self, id: &str, name: &str, arguments_json: &str) {
            self.queue_response(vec![
                StreamEvent::ToolCallStart { index: 0, id: id.to_string(), name: name.to_string() },
                StreamEvent::ToolCallDelta { index: 0, arguments_delta: arguments_json.to_string() },
                StreamEvent::MessageEnd { stop_reason: StopReason::ToolCalls },
            ]);
        }
    }

    impl Default for MockLlmProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ToolAwareLlmProvider for MockLlmProvider {
        async fn stream_with_tools(
            &self,
            _messages: Vec<ProviderMessage>,
            _system_prompt: Option<String>,
            _tools: Vec<ToolDefinition>,
            _tool_choice: ToolChoice,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>, LlmError> {
            let events = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| vec![StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn }]);
            Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
