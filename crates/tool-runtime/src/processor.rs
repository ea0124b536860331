//! Converts one LLM response into a stream of `Event`s, dispatching tool
//! executions per the configured policy.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::event::Event;
use crate::markup;
use crate::provider::LlmError;
use crate::registry::ToolRegistry;
use crate::stream::StreamEvent;
use crate::tool::{Tool, ToolCall, ToolContext, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExecutionStrategy {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlAddingStrategy {
    UserMessage,
    AssistantMessage,
    /// Reserved; treated identically to `AssistantMessage`.
    InlineEdit,
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub execute_tools: bool,
    pub native_tool_calling: bool,
    pub xml_tool_calling: bool,
    pub execute_on_stream: bool,
    pub tool_execution_strategy: ToolExecutionStrategy,
    pub xml_adding_strategy: XmlAddingStrategy,
    /// 0 = unlimited.
    pub max_xml_tool_calls: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            execute_tools: true,
            native_tool_calling: true,
            xml_tool_calling: true,
            execute_on_stream: true,
            tool_execution_strategy: ToolExecutionStrategy::Sequential,
            xml_adding_strategy: XmlAddingStrategy::AssistantMessage,
            max_xml_tool_calls: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrigin {
    Native,
    Markup,
}

#[derive(Debug, Clone)]
pub struct ExecutedCall {
    pub call: ToolCall,
    pub result: ToolResult,
    pub origin: CallOrigin,
}

/// Everything the Thread Manager needs to persist after one LLM response.
#[derive(Debug, Clone)]
pub struct ProcessorTurn {
    pub events: Vec<Event>,
    pub assistant_content: String,
    /// All native tool calls that completed parsing, whether or not they
    /// were executed (e.g. `execute_tools=false`) — these accompany the
    /// persisted assistant message.
    pub native_calls: Vec<ToolCall>,
    /// Calls actually executed, in completion order, each tagged with the
    /// calling convention it arrived through.
    pub executed: Vec<ExecutedCall>,
    pub finish_reason: String,
}

struct NativeCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

pub struct ResponseProcessor {
    registry: Arc<ToolRegistry>,
}

impl ResponseProcessor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Drives the streaming algorithm. The non-streaming path is the same
    /// algorithm fed a stream with exactly one logical "chunk sequence"
    /// (one `TextDelta` plus one `MessageEnd`), so there is no separate
    /// non-streaming implementation to keep in sync.
    pub async fn process(
        &self,
        mut chunks: Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>,
        config: &ProcessorConfig,
    ) -> ProcessorTurn {
        let mut accumulated_text = String::new();
        let mut xml_scan_window = String::new();
        let mut native_buffer: HashMap<u32, NativeCallBuilder> = HashMap::new();
        let mut native_dispatched: std::collections::HashSet<u32> = std::collections::HashSet::new();
        let mut native_completed: Vec<ToolCall> = Vec::new();

        let mut events = Vec::new();
        let mut executed: Vec<ExecutedCall> = Vec::new();
        let mut deferred: Vec<(ToolCall, CallOrigin)> = Vec::new();

        let mut xml_call_count = 0u32;
        let mut xml_limit_reached = false;
        let mut finish_reason = "end_turn".to_string();
        let tags = self.registry.markup_tags();

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    events.push(Event::error(e.to_string()));
                    return ProcessorTurn {
                        events,
                        assistant_content: accumulated_text,
                        native_calls: native_completed,
                        executed,
                        finish_reason: "error".to_string(),
                    };
                }
            };

            match chunk {
                StreamEvent::TextDelta { text } => {
                    accumulated_text.push_str(&text);
                    events.push(Event::content(text.clone()));
                    if config.xml_tool_calling {
                        xml_scan_window.push_str(&text);
                        self.drain_markup_calls(
                            &mut xml_scan_window,
                            &tags,
                            config,
                            &mut xml_call_count,
                            &mut xml_limit_reached,
                            &mut events,
                            &mut executed,
                            &mut deferred,
                        )
                        .await;
                    }
                }
                StreamEvent::ToolCallStart { index, id, name } => {
                    if config.native_tool_calling {
                        native_buffer.insert(index, NativeCallBuilder { id, name, arguments: String::new() });
                    }
                }
                StreamEvent::ToolCallDelta { index, arguments_delta } => {
                    if !config.native_tool_calling {
                        continue;
                    }
                    let Some(builder) = native_buffer.get_mut(&index) else { continue };
                    builder.arguments.push_str(&arguments_delta);
                    if native_dispatched.contains(&index) {
                        continue;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(&builder.arguments) else { continue };
                    if !value.is_object() {
                        continue;
                    }
                    native_dispatched.insert(index);
                    let call = ToolCall { id: builder.id.clone(), name: builder.name.clone(), input: value };
                    native_completed.push(call.clone());
                    self.dispatch(call, CallOrigin::Native, config, &mut events, &mut executed, &mut deferred)
                        .await;
                }
                StreamEvent::MessageEnd { stop_reason } => {
                    finish_reason = stop_reason.as_str().to_string();
                }
            }
        }

        // Any native call whose arguments never resolved to a complete JSON
        // object by the time the stream ended still gets dispatched: the raw
        // buffer is passed under `text` as a last-resort fallback, same as
        // the tool would receive any other malformed input, so it still
        // produces exactly one failed `ToolResult` rather than vanishing.
        let mut pending: Vec<(u32, NativeCallBuilder)> =
            native_buffer.into_iter().filter(|(index, _)| !native_dispatched.contains(index)).collect();
        pending.sort_by_key(|(index, _)| *index);
        for (_, builder) in pending {
            let value = serde_json::from_str::<Value>(&builder.arguments)
                .ok()
                .filter(Value::is_object)
                .unwrap_or_else(|| serde_json::json!({ "text": builder.arguments }));
            let call = ToolCall { id: builder.id, name: builder.name, input: value };
            native_completed.push(call.clone());
            self.dispatch(call, CallOrigin::Native, config, &mut events, &mut executed, &mut deferred).await;
        }

        if xml_limit_reached {
            finish_reason = "xml_tool_limit_reached".to_string();
        }

        self.drain_deferred(config, deferred, &mut events, &mut executed).await;
        events.push(Event::finish(finish_reason.clone()));

        ProcessorTurn {
            events,
            assistant_content: accumulated_text,
            native_calls: native_completed,
            executed,
            finish_reason,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn drain_markup_calls(
        &self,
        xml_scan_window: &mut String,
        tags: &[String],
        config: &ProcessorConfig,
        xml_call_count: &mut u32,
        xml_limit_reached: &mut bool,
        events: &mut Vec<Event>,
        executed: &mut Vec<ExecutedCall>,
        deferred: &mut Vec<(ToolCall, CallOrigin)>,
    ) {
        if *xml_limit_reached {
            return;
        }
        loop {
            if config.max_xml_tool_calls > 0 && *xml_call_count >= config.max_xml_tool_calls {
                *xml_limit_reached = true;
                return;
            }
            let Some((start, end, tag)) = markup::find_earliest_complete_chunk(xml_scan_window, tags) else {
                return;
            };
            let raw_chunk = xml_scan_window[start..end].to_string();
            *xml_scan_window = xml_scan_window[end..].to_string();

            let Some(lookup) = self.registry.get_by_tag(&tag) else {
                tracing::warn!(tag, "no tool registered for markup tag");
                continue;
            };
            let Some(call) = markup::parse_markup_call(&raw_chunk, &lookup) else {
                continue;
            };
            *xml_call_count += 1;
            self.dispatch(call, CallOrigin::Markup, config, events, executed, deferred).await;
        }
    }

    async fn dispatch(
        &self,
        call: ToolCall,
        origin: CallOrigin,
        config: &ProcessorConfig,
        events: &mut Vec<Event>,
        executed: &mut Vec<ExecutedCall>,
        deferred: &mut Vec<(ToolCall, CallOrigin)>,
    ) {
        if !config.execute_tools {
            return;
        }
        if config.execute_on_stream {
            events.push(Event::tool_started(call.name.clone(), call.input.clone()));
            let result = self.execute_one(&call).await;
            events.push(Event::tool_result(call.name.clone(), result.output.clone()));
            executed.push(ExecutedCall { call, result, origin });
        } else {
            deferred.push((call, origin));
        }
    }

    async fn drain_deferred(
        &self,
        config: &ProcessorConfig,
        deferred: Vec<(ToolCall, CallOrigin)>,
        events: &mut Vec<Event>,
        executed: &mut Vec<ExecutedCall>,
    ) {
        if deferred.is_empty() {
            return;
        }
        match config.tool_execution_strategy {
            ToolExecutionStrategy::Sequential => {
                for (call, origin) in deferred {
                    events.push(Event::tool_started(call.name.clone(), call.input.clone()));
                    let result = self.execute_one(&call).await;
                    events.push(Event::tool_result(call.name.clone(), result.output.clone()));
                    executed.push(ExecutedCall { call, result, origin });
                }
            }
            ToolExecutionStrategy::Parallel => {
                for (call, _) in &deferred {
                    events.push(Event::tool_started(call.name.clone(), call.input.clone()));
                }
                let results = futures::future::join_all(deferred.iter().map(|(call, _)| self.execute_one(call))).await;
                for ((call, origin), result) in deferred.into_iter().zip(results) {
                    events.push(Event::tool_result(call.name.clone(), result.output.clone()));
                    executed.push(ExecutedCall { call, result, origin });
                }
            }
        }
    }

    /// Executes one call. Unknown tools and tool-level panics/errors never
    /// abort the response — they become a failure `ToolResult`.
    async fn execute_one(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolResult::err(call.id.clone(), call.name.clone(), format!("unknown tool '{}'", call.name));
        };
        let ctx = ToolContext::default();
        match tool.execute(call.input.clone(), &ctx).await {
            Ok(mut result) => {
                result.tool_call_id = call.id.clone();
                result
            }
            Err(e) => ToolResult::err(call.id.clone(), call.name.clone(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StopReason;
    use crate::tools::{CreateNoteTool, EchoTool};
    use futures::stream;

    fn registry() -> Arc<ToolRegistry> {
        let mut r = ToolRegistry::new();
        r.register(EchoTool).unwrap();
        r.register(CreateNoteTool::new()).unwrap();
        Arc::new(r)
    }

    fn chunks(events: Vec<StreamEvent>) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>> {
        Box::pin(stream::iter(events.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn plain_text_response_yields_content_then_finish() {
        let processor = ResponseProcessor::new(registry());
        let config = ProcessorConfig::default();
        let turn = processor
            .process(
                chunks(vec![
                    StreamEvent::TextDelta { text: "hello".to_string() },
                    StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn },
                ]),
                &config,
            )
            .await;

        assert_eq!(turn.assistant_content, "hello");
        assert_eq!(turn.finish_reason, "end_turn");
        assert!(turn.executed.is_empty());
        assert!(matches!(turn.events.last(), Some(Event::Finish { finish_reason }) if finish_reason == "end_turn"));
    }

    #[tokio::test]
    async fn native_tool_call_executes_and_is_recorded() {
        let processor = ResponseProcessor::new(registry());
        let config = ProcessorConfig::default();
        let turn = processor
            .process(
                chunks(vec![
                    StreamEvent::ToolCallStart { index: 0, id: "call_1".to_string(), name: "echo".to_string() },
                    StreamEvent::ToolCallDelta { index: 0, arguments_delta: r#"{"message":"hi"}"#.to_string() },
                    StreamEvent::MessageEnd { stop_reason: StopReason::ToolCalls },
                ]),
                &config,
            )
            .await;

        assert_eq!(turn.native_calls.len(), 1);
        assert_eq!(turn.executed.len(), 1);
        assert_eq!(turn.executed[0].result.output, "hi");
        assert_eq!(turn.finish_reason, "tool_calls");
    }

    #[tokio::test]
    async fn markup_tool_call_is_parsed_and_executed() {
        let processor = ResponseProcessor::new(registry());
        let config = ProcessorConfig::default();
        let turn = processor
            .process(
                chunks(vec![
                    StreamEvent::TextDelta {
                        text: "noted: <create_note title=\"hi\">body text</create_note> done".to_string(),
                    },
                    StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn },
                ]),
                &config,
            )
            .await;

        assert_eq!(turn.executed.len(), 1);
        assert_eq!(turn.executed[0].origin, CallOrigin::Markup);
        assert!(turn.assistant_content.contains("noted:"));
    }

    #[tokio::test]
    async fn max_xml_tool_calls_caps_and_reports_limit_reached() {
        let processor = ResponseProcessor::new(registry());
        let mut config = ProcessorConfig::default();
        config.max_xml_tool_calls = 1;
        let turn = processor
            .process(
                chunks(vec![
                    StreamEvent::TextDelta {
                        text: "<create_note title=\"a\">x</create_note><create_note title=\"b\">y</create_note>"
                            .to_string(),
                    },
                    StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn },
                ]),
                &config,
            )
            .await;

        assert_eq!(turn.executed.len(), 1);
        assert_eq!(turn.finish_reason, "xml_tool_limit_reached");
    }

    #[tokio::test]
    async fn unknown_native_tool_becomes_failure_result_not_abort() {
        let processor = ResponseProcessor::new(registry());
        let config = ProcessorConfig::default();
        let turn = processor
            .process(
                chunks(vec![
                    StreamEvent::ToolCallStart { index: 0, id: "call_1".to_string(), name: "nonexistent".to_string() },
                    StreamEvent::ToolCallDelta { index: 0, arguments_delta: "{}".to_string() },
                    StreamEvent::MessageEnd { stop_reason: StopReason::ToolCalls },
                ]),
                &config,
            )
            .await;

        assert_eq!(turn.executed.len(), 1);
        assert!(!turn.executed[0].result.success);
    }

    #[tokio::test]
    async fn malformed_native_arguments_fall_back_to_text_and_fail() {
        let processor = ResponseProcessor::new(registry());
        let config = ProcessorConfig::default();
        let turn = processor
            .process(
                chunks(vec![
                    StreamEvent::ToolCallStart { index: 0, id: "call_1".to_string(), name: "echo".to_string() },
                    StreamEvent::ToolCallDelta { index: 0, arguments_delta: "{not json".to_string() },
                    StreamEvent::MessageEnd { stop_reason: StopReason::ToolCalls },
                ]),
                &config,
            )
            .await;

        assert_eq!(turn.native_calls.len(), 1);
        assert_eq!(turn.native_calls[0].input, serde_json::json!({ "text": "{not json" }));
        assert_eq!(turn.executed.len(), 1);
        assert!(!turn.executed[0].result.success);
        assert!(turn.events.iter().any(|e| matches!(e, Event::ToolResult { name, .. } if name == "echo")));
    }
}
