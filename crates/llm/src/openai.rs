//! An OpenAI-chat-completions-compatible `ToolAwareLlmProvider`. Non-streaming:
//! one HTTP round trip produces the whole response, which is replayed to the
//! Response Processor as a single logical chunk sequence — the same shape
//! the non-streaming algorithm expects (§4.2's "same as streaming, but with a
//! single chunk representing the whole response").

use async_trait::async_trait;
use futures::{stream, Stream};
use serde_json::{json, Value};
use std::pin::Pin;
use tracing::debug;

use agentrun_tool_runtime::{
    LlmError, ProviderMessage, StopReason, StreamEvent, ToolAwareLlmProvider, ToolChoice, ToolDefinition,
};

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self { client: reqwest::Client::new(), api_key, model, base_url }
    }
}

fn tool_choice_wire(choice: ToolChoice) -> &'static str {
    match choice {
        ToolChoice::Auto => "auto",
        ToolChoice::Required => "required",
        ToolChoice::None => "none",
    }
}

fn to_wire_message(m: &ProviderMessage) -> Value {
    if let Some(tool_calls) = m.content.get("tool_calls").and_then(|v| v.as_array()) {
        let wire_calls: Vec<Value> = tool_calls
            .iter()
            .map(|c| {
                json!({
                    "id": c["id"],
                    "type": "function",
                    "function": {"name": c["name"], "arguments": c["arguments"]},
                })
            })
            .collect();
        return json!({
            "role": m.role,
            "content": m.content.get("content").cloned().unwrap_or(Value::Null),
            "tool_calls": wire_calls,
        });
    }

    let mut body = json!({"role": m.role, "content": m.content});
    if let Some(id) = &m.tool_call_id {
        body["tool_call_id"] = Value::String(id.clone());
    }
    body
}

fn tool_definitions_wire(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                },
            })
        })
        .collect()
}

fn finish_reason_to_stop(reason: &str) -> StopReason {
    match reason {
        "tool_calls" => StopReason::ToolCalls,
        "length" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn response_to_events(resp: &Value) -> Result<Vec<StreamEvent>, LlmError> {
    let choice = resp["choices"].get(0).ok_or_else(|| LlmError::Transient("missing choices[0]".to_string()))?;
    let message = &choice["message"];

    let mut events = Vec::new();
    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(StreamEvent::TextDelta { text: text.to_string() });
        }
    }

    if let Some(tool_calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for (index, call) in tool_calls.iter().enumerate() {
            let id = call["id"].as_str().unwrap_or_default().to_string();
            let name = call["function"]["name"].as_str().unwrap_or_default().to_string();
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}").to_string();
            events.push(StreamEvent::ToolCallStart { index: index as u32, id, name });
            events.push(StreamEvent::ToolCallDelta { index: index as u32, arguments_delta: arguments });
        }
    }

    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    events.push(StreamEvent::MessageEnd { stop_reason: finish_reason_to_stop(finish_reason) });
    Ok(events)
}

#[async_trait]
impl ToolAwareLlmProvider for OpenAiProvider {
    async fn stream_with_tools(
        &self,
        messages: Vec<ProviderMessage>,
        system_prompt: Option<String>,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
        temperature: f32,
        max_tokens: Option<u32>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            wire_messages.push(json!({"role": "system", "content": system}));
        }
        wire_messages.extend(messages.iter().map(to_wire_message));

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": temperature,
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tool_definitions_wire(&tools));
            body["tool_choice"] = json!(tool_choice_wire(tool_choice));
        }

        debug!(%url, model = %self.model, "calling chat completions endpoint");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthError);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if status.is_client_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidRequest(text));
        }
        if status.is_server_error() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Transient(text));
        }

        let parsed: Value = response.json().await.map_err(|e| LlmError::Transient(e.to_string()))?;
        let events = response_to_events(&parsed)?;
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_response_yields_content_then_end_turn() {
        let resp = json!({
            "choices": [{
                "message": {"content": "hi there"},
                "finish_reason": "stop",
            }]
        });
        let events = response_to_events(&resp).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], StreamEvent::TextDelta { text } if text == "hi there"));
        assert!(matches!(events[1], StreamEvent::MessageEnd { stop_reason: StopReason::EndTurn }));
    }

    #[test]
    fn tool_call_response_yields_start_and_delta_per_call() {
        let resp = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "call_1", "function": {"name": "echo", "arguments": "{\"message\":\"hi\"}"}},
                    ],
                },
                "finish_reason": "tool_calls",
            }]
        });
        let events = response_to_events(&resp).unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::ToolCallStart { name, .. } if name == "echo"));
        assert!(matches!(events[2], StreamEvent::MessageEnd { stop_reason: StopReason::ToolCalls }));
    }
}
