//! Thread/Message data model and its persistence trait, grounded on the
//! teacher's one-JSON-file-per-session `SessionStore` (file-per-thread JSON,
//! corrupt-file tolerance, pretty-printed writes).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentrun_core::{EngineError, EngineResult, MessageId, ThreadId};
use agentrun_tool_runtime::ToolCall;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
    Summary,
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: Role,
    /// Text or a list of provider content blocks — left as `Value` since the
    /// engine passes content through to the provider without interpreting
    /// its shape beyond role and `is_llm_message`.
    pub content: Value,
    #[serde(default)]
    pub native_tool_calls: Vec<ToolCall>,
    /// Present on tool-result messages; the native call id it answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub is_llm_message: bool,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ThreadRecord {
    messages: Vec<Message>,
}

/// Minimum persistence the engine needs, kept storage-agnostic behind a
/// trait so a SQL- or document-store-backed implementation can replace the
/// file-backed default without touching the Thread Manager.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn append_message(&self, thread_id: ThreadId, message: Message) -> EngineResult<()>;

    /// All messages for a thread in insertion order.
    async fn list_messages(&self, thread_id: ThreadId) -> EngineResult<Vec<Message>>;

    async fn create_thread(&self, thread_id: ThreadId) -> EngineResult<()>;

    async fn thread_exists(&self, thread_id: ThreadId) -> EngineResult<bool>;
}

/// File-per-thread JSON store, directly grounded on `SessionStore`.
pub struct FileThreadStore {
    dir: PathBuf,
}

impl FileThreadStore {
    pub fn new(data_dir: &Path) -> EngineResult<Self> {
        let dir = data_dir.join("threads");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, thread_id: ThreadId) -> PathBuf {
        self.dir.join(format!("{}.json", thread_id))
    }

    fn read(&self, thread_id: ThreadId) -> EngineResult<Option<ThreadRecord>> {
        let path = self.path(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping corrupt thread file");
                Ok(None)
            }
        }
    }

    fn write(&self, thread_id: ThreadId, record: &ThreadRecord) -> EngineResult<()> {
        let data = serde_json::to_string_pretty(record)?;
        std::fs::write(self.path(thread_id), data)?;
        Ok(())
    }
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn append_message(&self, thread_id: ThreadId, message: Message) -> EngineResult<()> {
        let mut record = self.read(thread_id)?.ok_or_else(|| {
            EngineError::Input(format!("thread '{thread_id}' does not exist"))
        })?;
        record.messages.push(message);
        self.write(thread_id, &record)
    }

    async fn list_messages(&self, thread_id: ThreadId) -> EngineResult<Vec<Message>> {
        let record = self.read(thread_id)?.ok_or_else(|| {
            EngineError::Input(format!("thread '{thread_id}' does not exist"))
        })?;
        Ok(record.messages)
    }

    async fn create_thread(&self, thread_id: ThreadId) -> EngineResult<()> {
        if self.read(thread_id)?.is_some() {
            return Ok(());
        }
        self.write(thread_id, &ThreadRecord::default())
    }

    async fn thread_exists(&self, thread_id: ThreadId) -> EngineResult<bool> {
        Ok(self.read(thread_id)?.is_some())
    }
}

/// The prompt-visible prefix of a thread: starting at the most recent
/// `summary` message (if any) and continuing through every subsequent
/// `is_llm_message=true` message.
pub async fn effective_history(store: &dyn ThreadStore, thread_id: ThreadId) -> EngineResult<Vec<Message>> {
    let messages = store.list_messages(thread_id).await?;
    let start = messages.iter().rposition(|m| m.role == Role::Summary).unwrap_or(0);
    Ok(messages[start..].iter().filter(|m| m.is_llm_message).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message {
            id: MessageId::new(),
            thread_id: ThreadId::new(),
            role,
            content: Value::String(content.to_string()),
            native_tool_calls: vec![],
            tool_call_id: None,
            is_llm_message: true,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn append_and_list_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path()).unwrap();
        let thread_id = ThreadId::new();
        store.create_thread(thread_id).await.unwrap();
        store.append_message(thread_id, msg(Role::User, "hi")).await.unwrap();
        store.append_message(thread_id, msg(Role::Assistant, "hello")).await.unwrap();

        let messages = store.list_messages(thread_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), Some("hi"));
        assert_eq!(messages[1].text(), Some("hello"));
    }

    #[tokio::test]
    async fn appending_to_unknown_thread_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path()).unwrap();
        let err = store.append_message(ThreadId::new(), msg(Role::User, "hi")).await.unwrap_err();
        assert!(matches!(err, EngineError::Input(_)));
    }

    #[tokio::test]
    async fn effective_history_starts_at_most_recent_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileThreadStore::new(dir.path()).unwrap();
        let thread_id = ThreadId::new();
        store.create_thread(thread_id).await.unwrap();
        store.append_message(thread_id, msg(Role::User, "one")).await.unwrap();
        store.append_message(thread_id, msg(Role::Summary, "recap")).await.unwrap();
        store.append_message(thread_id, msg(Role::User, "two")).await.unwrap();

        let history = effective_history(&store, thread_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), Some("recap"));
        assert_eq!(history[1].text(), Some("two"));
    }
}
