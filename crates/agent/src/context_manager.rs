//! Counts tokens in the effective history and, once a threshold is crossed,
//! asks the LLM to summarize and appends a `summary` message that supersedes
//! everything before it for future history reads.

use agentrun_core::{EngineError, EngineResult, MessageId, ThreadId};
use agentrun_tool_runtime::{ProviderMessage, StreamEvent, ToolAwareLlmProvider, ToolChoice};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

use crate::thread::{effective_history, Message, Role, ThreadStore};

/// chars/4 approximation, matching the teacher's `Conversation::estimate_tokens`
/// rather than pulling in a real tokenizer.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32) / 4
}

pub struct ContextManager {
    pub token_threshold: u32,
}

impl ContextManager {
    pub fn new(token_threshold: u32) -> Self {
        Self { token_threshold }
    }

    /// Returns whether a summary message was written.
    pub async fn check_and_summarize_if_needed(
        &self,
        thread_id: ThreadId,
        store: &dyn ThreadStore,
        provider: &dyn ToolAwareLlmProvider,
        system_prompt: Option<&str>,
        force: bool,
    ) -> EngineResult<bool> {
        let history = effective_history(store, thread_id).await?;
        let mut total = system_prompt.map(estimate_tokens).unwrap_or(0);
        for message in &history {
            if let Some(text) = message.text() {
                total += estimate_tokens(text);
            }
        }

        if !force && total < self.token_threshold {
            return Ok(false);
        }

        let transcript = history
            .iter()
            .filter_map(|m| m.text().map(|t| format!("{:?}: {t}", m.role)))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = vec![ProviderMessage {
            role: "user".to_string(),
            content: Value::String(format!(
                "Summarize the conversation so far, preserving important facts and decisions:\n\n{transcript}"
            )),
            tool_call_id: None,
        }];

        let events = provider
            .complete_with_tools(prompt, None, vec![], ToolChoice::None, 0.0, None)
            .await
            .map_err(|e| EngineError::Provider(e.to_string()))?;

        let summary_text: String = events
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text),
                _ => None,
            })
            .collect();

        let summary = Message {
            id: MessageId::new(),
            thread_id,
            role: Role::Summary,
            content: Value::String(summary_text),
            native_tool_calls: vec![],
            tool_call_id: None,
            is_llm_message: true,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        };
        store.append_message(thread_id, summary).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::FileThreadStore;
    use agentrun_tool_runtime::MockLlmProvider;

    #[tokio::test]
    async fn below_threshold_and_not_forced_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path()).unwrap();
        let thread_id = ThreadId::new();
        store.create_thread(thread_id).await.unwrap();
        store
            .append_message(
                thread_id,
                Message {
                    id: MessageId::new(),
                    thread_id,
                    role: Role::User,
                    content: Value::String("hi".to_string()),
                    native_tool_calls: vec![],
                    tool_call_id: None,
                    is_llm_message: true,
                    metadata: HashMap::new(),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let manager = ContextManager::new(10_000);
        let provider = MockLlmProvider::new();
        let wrote = manager
            .check_and_summarize_if_needed(thread_id, &store, &provider, None, false)
            .await
            .unwrap();
        assert!(!wrote);
    }

    #[tokio::test]
    async fn forced_summarization_appends_a_summary_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path()).unwrap();
        let thread_id = ThreadId::new();
        store.create_thread(thread_id).await.unwrap();
        store
            .append_message(
                thread_id,
                Message {
                    id: MessageId::new(),
                    thread_id,
                    role: Role::User,
                    content: Value::String("a long conversation happened here".to_string()),
                    native_tool_calls: vec![],
                    tool_call_id: None,
                    is_llm_message: true,
                    metadata: HashMap::new(),
                    created_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let manager = ContextManager::new(10_000);
        let provider = MockLlmProvider::new();
        provider.queue_text("recap of the conversation");
        let wrote = manager
            .check_and_summarize_if_needed(thread_id, &store, &provider, None, true)
            .await
            .unwrap();
        assert!(wrote);

        let history = effective_history(&store, thread_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Summary);
        assert_eq!(history[0].text(), Some("recap of the conversation"));
    }
}
