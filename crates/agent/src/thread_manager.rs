//! Drives a single `run_thread` turn, including the native-tool-call
//! auto-continue loop and prompt composition, delegating per-response work
//! to the Response Processor.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use agentrun_core::{EngineError, EngineResult, MessageId, ThreadId};
use agentrun_tool_runtime::{
    Event, ProcessorConfig, ProviderMessage, ResponseProcessor, RetryPolicy, ToolAwareLlmProvider,
    ToolCall, ToolChoice, ToolRegistry,
};

use crate::context_manager::ContextManager;
use crate::thread::{effective_history, Message, Role, ThreadStore};

/// Parameters for one `run_thread` invocation (§4.3).
pub struct RunThreadParams {
    pub thread_id: ThreadId,
    pub system_prompt: Value,
    /// Extra user-role content injected immediately before the last
    /// user-role message on the first pass only; never persisted.
    pub temporary_message: Option<Value>,
    pub processor_config: ProcessorConfig,
    pub tool_choice: ToolChoice,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// 0 disables auto-continue.
    pub native_max_auto_continues: u32,
    pub include_xml_examples: bool,
    pub enable_context_manager: bool,
}

pub struct ThreadManager {
    store: Arc<dyn ThreadStore>,
    registry: Arc<ToolRegistry>,
    processor: ResponseProcessor,
    context_manager: ContextManager,
    retry: RetryPolicy,
}

impl ThreadManager {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        registry: Arc<ToolRegistry>,
        context_manager: ContextManager,
    ) -> Self {
        let processor = ResponseProcessor::new(registry.clone());
        Self { store, registry, processor, context_manager, retry: RetryPolicy::default() }
    }

    pub async fn add_message(
        &self,
        thread_id: ThreadId,
        role: Role,
        content: Value,
        is_llm_message: bool,
        metadata: HashMap<String, Value>,
    ) -> EngineResult<MessageId> {
        self.add_message_with_tool_calls(thread_id, role, content, vec![], is_llm_message, metadata).await
    }

    /// Same as `add_message`, but also records the native tool calls the
    /// assistant made in this turn, so a later pass can replay them back to
    /// the provider (`message_to_provider_message`) instead of presenting an
    /// orphaned `tool`-role message.
    pub async fn add_message_with_tool_calls(
        &self,
        thread_id: ThreadId,
        role: Role,
        content: Value,
        native_tool_calls: Vec<ToolCall>,
        is_llm_message: bool,
        metadata: HashMap<String, Value>,
    ) -> EngineResult<MessageId> {
        let id = MessageId::new();
        let message = Message {
            id,
            thread_id,
            role,
            content,
            native_tool_calls,
            tool_call_id: None,
            is_llm_message,
            metadata,
            created_at: Utc::now(),
        };
        self.store.append_message(thread_id, message).await?;
        Ok(id)
    }

    /// The effective prompt history, normalized to the provider's message
    /// shape — `tool_calls` arguments are re-encoded as JSON strings so
    /// providers that require this are satisfied uniformly.
    pub async fn get_llm_messages(&self, thread_id: ThreadId) -> EngineResult<Vec<ProviderMessage>> {
        let history = effective_history(&*self.store, thread_id).await?;
        Ok(history.iter().map(message_to_provider_message).collect())
    }

    /// Precomputes the system prompt once for the whole run and opens the
    /// pass counter, so a caller can drive `run_next_pass` one pass at a
    /// time instead of only getting the whole run's events back at once.
    pub fn begin_run(&self, params: &RunThreadParams) -> RunPassState {
        let mut system_prompt = params.system_prompt.clone();
        if params.include_xml_examples && params.processor_config.xml_tool_calling {
            let examples = self.registry.render_xml_examples();
            append_to_prompt_text(&mut system_prompt, &examples);
        }
        let system_prompt_text = prompt_text(&system_prompt);
        RunPassState { system_prompt_text, auto_continue_count: 0 }
    }

    /// Runs exactly one LLM call and its tool-execution turn, persisting the
    /// assistant message and any tool results before returning. The caller
    /// decides what to do between passes — a `run_task` that wants to stream
    /// events as they're produced, or stop cooperatively between passes,
    /// drives this directly instead of going through `run_thread`.
    pub async fn run_next_pass(
        &self,
        provider: &dyn ToolAwareLlmProvider,
        params: &RunThreadParams,
        state: &mut RunPassState,
    ) -> EngineResult<PassOutcome> {
        let first_pass = state.auto_continue_count == 0;

        if params.enable_context_manager {
            self.context_manager
                .check_and_summarize_if_needed(
                    params.thread_id,
                    &*self.store,
                    provider,
                    Some(&state.system_prompt_text),
                    false,
                )
                .await?;
        }

        let mut messages = self.get_llm_messages(params.thread_id).await?;
        if first_pass {
            if let Some(temp) = &params.temporary_message {
                insert_temporary_message(&mut messages, temp.clone());
            }
        }

        let tools = if params.processor_config.native_tool_calling {
            self.registry.list()
        } else {
            vec![]
        };

        let stream_result = self
            .retry
            .run(|| {
                provider.stream_with_tools(
                    messages.clone(),
                    Some(state.system_prompt_text.clone()),
                    tools.clone(),
                    params.tool_choice,
                    params.temperature,
                    params.max_tokens,
                )
            })
            .await;

        let chunks = match stream_result {
            Ok(chunks) => chunks,
            Err(e) => return Ok(PassOutcome::Done { events: vec![Event::error(e.to_string())] }),
        };

        let turn = self.processor.process(chunks, &params.processor_config).await;

        self.add_message_with_tool_calls(
            params.thread_id,
            Role::Assistant,
            Value::String(turn.assistant_content.clone()),
            turn.native_calls.clone(),
            true,
            HashMap::new(),
        )
        .await?;

        for executed in &turn.executed {
            let message = Message {
                id: MessageId::new(),
                thread_id: params.thread_id,
                role: Role::ToolResult,
                content: Value::String(executed.result.output.clone()),
                native_tool_calls: vec![],
                tool_call_id: Some(executed.result.tool_call_id.clone()),
                is_llm_message: true,
                metadata: HashMap::new(),
                created_at: Utc::now(),
            };
            self.store.append_message(params.thread_id, message).await?;
        }

        let should_continue = turn.finish_reason == "tool_calls"
            && params.native_max_auto_continues > 0
            && state.auto_continue_count < params.native_max_auto_continues;

        if should_continue {
            state.auto_continue_count += 1;
            let events = turn.events.into_iter().filter(|e| !matches!(e, Event::Finish { .. })).collect();
            return Ok(PassOutcome::Continue { events });
        }

        let hit_limit = turn.finish_reason == "tool_calls"
            && params.native_max_auto_continues > 0
            && state.auto_continue_count >= params.native_max_auto_continues;

        let mut events = turn.events;
        if hit_limit {
            events.push(Event::content("auto-continue limit reached"));
        }
        Ok(PassOutcome::Done { events })
    }

    /// Runs every pass of a thread to completion and returns the full run's
    /// events. A caller that needs to observe or interrupt between passes
    /// (e.g. to stream events as they're produced, or to stop cooperatively)
    /// should drive `begin_run`/`run_next_pass` directly instead.
    pub async fn run_thread(
        &self,
        provider: &dyn ToolAwareLlmProvider,
        params: RunThreadParams,
    ) -> EngineResult<Vec<Event>> {
        let mut state = self.begin_run(&params);
        let mut all_events = Vec::new();
        loop {
            match self.run_next_pass(provider, &params, &mut state).await? {
                PassOutcome::Continue { events } => {
                    all_events.extend(events);
                }
                PassOutcome::Done { events } => {
                    all_events.extend(events);
                    break;
                }
            }
        }
        Ok(all_events)
    }
}

/// Carries the precomputed system prompt and auto-continue counter across
/// repeated `run_next_pass` calls for one run.
pub struct RunPassState {
    system_prompt_text: String,
    auto_continue_count: u32,
}

/// The result of one `run_next_pass` call.
pub enum PassOutcome {
    /// Another pass is about to start (auto-continuing on tool calls).
    Continue { events: Vec<Event> },
    /// The run reached a terminal state; no further passes will occur.
    Done { events: Vec<Event> },
}

fn message_to_provider_message(message: &Message) -> ProviderMessage {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::ToolResult => "tool",
        Role::Summary => "system",
        Role::Status => "system",
    }
    .to_string();

    let content = if message.native_tool_calls.is_empty() {
        message.content.clone()
    } else {
        let tool_calls: Vec<Value> = message
            .native_tool_calls
            .iter()
            .map(|c| json!({"id": c.id, "name": c.name, "arguments": c.input.to_string()}))
            .collect();
        json!({"content": message.content, "tool_calls": tool_calls})
    };

    ProviderMessage { role, content, tool_call_id: message.tool_call_id.clone() }
}

fn prompt_text(prompt: &Value) -> String {
    match prompt {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .find_map(|b| b.get("text").and_then(|t| t.as_str()))
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    }
}

fn append_to_prompt_text(prompt: &mut Value, extra: &str) {
    match prompt {
        Value::String(s) => {
            s.push_str("\n\n");
            s.push_str(extra);
        }
        Value::Array(blocks) => {
            if let Some(first) = blocks.first_mut() {
                if let Some(text) = first.get_mut("text") {
                    if let Some(s) = text.as_str() {
                        *text = Value::String(format!("{s}\n\n{extra}"));
                    }
                }
            }
        }
        _ => {}
    }
}

/// Inserts the temporary message immediately before the last user-role
/// message, or appends it if none exists.
fn insert_temporary_message(messages: &mut Vec<ProviderMessage>, content: Value) {
    let temp = ProviderMessage { role: "user".to_string(), content, tool_call_id: None };
    match messages.iter().rposition(|m| m.role == "user") {
        Some(idx) => messages.insert(idx, temp),
        None => messages.push(temp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::FileThreadStore;
    use agentrun_tool_runtime::{
        EchoTool, LlmError, MockLlmProvider, StopReason, StreamEvent, ToolDefinition,
        ToolExecutionStrategy, XmlAddingStrategy,
    };
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Unlike `MockLlmProvider` (which ignores its `messages` argument), this
    /// provider records every call's `messages` so a test can assert the
    /// conversation sent back on the next pass is well-formed — in
    /// particular that a `tool`-role message's `tool_call_id` is answering a
    /// `tool_calls` entry an earlier assistant message actually declared.
    struct RecordingProvider {
        calls: Mutex<Vec<Vec<ProviderMessage>>>,
        responses: Mutex<std::collections::VecDeque<Vec<StreamEvent>>>,
    }

    impl RecordingProvider {
        fn new(responses: Vec<Vec<StreamEvent>>) -> Self {
            Self { calls: Mutex::new(Vec::new()), responses: Mutex::new(responses.into()) }
        }

        fn calls(&self) -> Vec<Vec<ProviderMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ToolAwareLlmProvider for RecordingProvider {
        async fn stream_with_tools(
            &self,
            messages: Vec<ProviderMessage>,
            _system_prompt: Option<String>,
            _tools: Vec<ToolDefinition>,
            _tool_choice: ToolChoice,
            _temperature: f32,
            _max_tokens: Option<u32>,
        ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>, LlmError> {
            self.calls.lock().unwrap().push(messages);
            let next = self.responses.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(futures::stream::iter(next.into_iter().map(Ok))))
        }

        fn provider_name(&self) -> &str {
            "recording"
        }
    }

    fn processor_config() -> ProcessorConfig {
        ProcessorConfig {
            execute_tools: true,
            native_tool_calling: true,
            xml_tool_calling: false,
            execute_on_stream: false,
            tool_execution_strategy: ToolExecutionStrategy::Sequential,
            xml_adding_strategy: XmlAddingStrategy::AssistantMessage,
            max_xml_tool_calls: 0,
        }
    }

    async fn manager() -> (ThreadManager, ThreadId) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ThreadStore> = Arc::new(FileThreadStore::new(dir.path()).unwrap());
        let thread_id = ThreadId::new();
        store.create_thread(thread_id).await.unwrap();

        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let registry = Arc::new(registry);

        let context_manager = ContextManager::new(10_000);
        (ThreadManager::new(store, registry, context_manager), thread_id)
    }

    #[tokio::test]
    async fn plain_turn_persists_one_assistant_message() {
        let (manager, thread_id) = manager().await;
        let provider = MockLlmProvider::new();
        provider.queue_text("hello there");

        let params = RunThreadParams {
            thread_id,
            system_prompt: Value::String("you are helpful".to_string()),
            temporary_message: None,
            processor_config: processor_config(),
            tool_choice: ToolChoice::Auto,
            temperature: 0.0,
            max_tokens: None,
            native_max_auto_continues: 0,
            include_xml_examples: false,
            enable_context_manager: false,
        };

        let events = manager.run_thread(&provider, params).await.unwrap();
        assert!(matches!(events.last(), Some(Event::Finish { finish_reason }) if finish_reason == "end_turn"));

        let history = manager.get_llm_messages(thread_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "assistant");
    }

    #[tokio::test]
    async fn auto_continue_runs_a_second_llm_call_and_swallows_intermediate_finish() {
        let (manager, thread_id) = manager().await;
        let provider = MockLlmProvider::new();
        provider.queue_tool_call("call_1", "echo", r#"{"message":"hi"}"#);
        provider.queue_text("done");

        let params = RunThreadParams {
            thread_id,
            system_prompt: Value::String("you are helpful".to_string()),
            temporary_message: None,
            processor_config: processor_config(),
            tool_choice: ToolChoice::Auto,
            temperature: 0.0,
            max_tokens: None,
            native_max_auto_continues: 2,
            include_xml_examples: false,
            enable_context_manager: false,
        };

        let events = manager.run_thread(&provider, params).await.unwrap();
        let finish_events: Vec<_> = events.iter().filter(|e| matches!(e, Event::Finish { .. })).collect();
        assert_eq!(finish_events.len(), 1);
        assert!(matches!(finish_events[0], Event::Finish { finish_reason } if finish_reason == "end_turn"));

        let history = manager.get_llm_messages(thread_id).await.unwrap();
        let assistant_count = history.iter().filter(|m| m.role == "assistant").count();
        assert_eq!(assistant_count, 2);
    }

    #[tokio::test]
    async fn zero_max_auto_continues_makes_exactly_one_llm_call() {
        let (manager, thread_id) = manager().await;
        let provider = MockLlmProvider::new();
        provider.queue_tool_call("call_1", "echo", r#"{"message":"hi"}"#);
        provider.queue_text("should not be reached");

        let params = RunThreadParams {
            thread_id,
            system_prompt: Value::String("you are helpful".to_string()),
            temporary_message: None,
            processor_config: processor_config(),
            tool_choice: ToolChoice::Auto,
            temperature: 0.0,
            max_tokens: None,
            native_max_auto_continues: 0,
            include_xml_examples: false,
            enable_context_manager: false,
        };

        manager.run_thread(&provider, params).await.unwrap();
        let history = manager.get_llm_messages(thread_id).await.unwrap();
        let assistant_count = history.iter().filter(|m| m.role == "assistant").count();
        assert_eq!(assistant_count, 1);
    }

    #[tokio::test]
    async fn auto_continue_replays_the_native_tool_call_on_the_next_pass() {
        let (manager, thread_id) = manager().await;
        let provider = RecordingProvider::new(vec![
            vec![
                StreamEvent::ToolCallStart { index: 0, id: "call_1".to_string(), name: "echo".to_string() },
                StreamEvent::ToolCallDelta { index: 0, arguments_delta: r#"{"message":"hi"}"#.to_string() },
                StreamEvent::MessageEnd { stop_reason: StopReason::ToolCalls },
            ],
            vec![
                StreamEvent::TextDelta { text: "done".to_string() },
                StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn },
            ],
        ]);

        let params = RunThreadParams {
            thread_id,
            system_prompt: Value::String("you are helpful".to_string()),
            temporary_message: None,
            processor_config: processor_config(),
            tool_choice: ToolChoice::Auto,
            temperature: 0.0,
            max_tokens: None,
            native_max_auto_continues: 2,
            include_xml_examples: false,
            enable_context_manager: false,
        };

        manager.run_thread(&provider, params).await.unwrap();

        let calls = provider.calls();
        assert_eq!(calls.len(), 2, "auto-continue should make exactly one more provider call");

        let second_call_messages = &calls[1];
        let assistant_with_calls = second_call_messages
            .iter()
            .find(|m| m.role == "assistant" && m.content.get("tool_calls").is_some())
            .expect("the first pass's assistant message must carry its native tool calls into the next pass");
        let tool_calls = assistant_with_calls.content["tool_calls"].as_array().unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0]["id"], "call_1");

        let tool_result_message = second_call_messages
            .iter()
            .find(|m| m.role == "tool")
            .expect("the tool result must be present for the next pass");
        assert_eq!(tool_result_message.tool_call_id.as_deref(), Some("call_1"));
    }
}
