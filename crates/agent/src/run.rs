//! AgentRun data model and its persistence trait. File-per-run JSON,
//! following the same pattern as `FileThreadStore`/`SessionStore`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agentrun_core::{EngineResult, RunId, ThreadId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Coarse durable copy of the event stream (§4.5.1); updated on a
    /// schedule during the run and finally at completion.
    #[serde(default)]
    pub responses: Vec<Value>,
}

impl AgentRun {
    pub fn new(id: RunId, thread_id: ThreadId) -> Self {
        Self {
            id,
            thread_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            responses: Vec::new(),
        }
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: AgentRun) -> EngineResult<()>;
    async fn get(&self, id: RunId) -> EngineResult<Option<AgentRun>>;
    async fn list_for_thread(&self, thread_id: ThreadId) -> EngineResult<Vec<AgentRun>>;
    async fn list_running(&self) -> EngineResult<Vec<AgentRun>>;

    async fn update_status(
        &self,
        id: RunId,
        status: RunStatus,
        error: Option<String>,
    ) -> EngineResult<()>;

    async fn append_responses(&self, id: RunId, events: &[Value]) -> EngineResult<()>;
}

pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub fn new(data_dir: &Path) -> EngineResult<Self> {
        let dir = data_dir.join("agent-runs");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: RunId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn read(&self, id: RunId) -> EngineResult<Option<AgentRun>> {
        let path = self.path(id);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&data) {
            Ok(run) => Ok(Some(run)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping corrupt run file");
                Ok(None)
            }
        }
    }

    fn write(&self, run: &AgentRun) -> EngineResult<()> {
        let data = serde_json::to_string_pretty(run)?;
        std::fs::write(self.path(run.id), data)?;
        Ok(())
    }

    fn all(&self) -> EngineResult<Vec<AgentRun>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Ok(data) = std::fs::read_to_string(&path) {
                    if let Ok(run) = serde_json::from_str::<AgentRun>(&data) {
                        runs.push(run);
                    }
                }
            }
        }
        Ok(runs)
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn insert(&self, run: AgentRun) -> EngineResult<()> {
        self.write(&run)
    }

    async fn get(&self, id: RunId) -> EngineResult<Option<AgentRun>> {
        self.read(id)
    }

    async fn list_for_thread(&self, thread_id: ThreadId) -> EngineResult<Vec<AgentRun>> {
        Ok(self.all()?.into_iter().filter(|r| r.thread_id == thread_id).collect())
    }

    async fn list_running(&self) -> EngineResult<Vec<AgentRun>> {
        Ok(self.all()?.into_iter().filter(|r| r.status == RunStatus::Running).collect())
    }

    async fn update_status(&self, id: RunId, status: RunStatus, error: Option<String>) -> EngineResult<()> {
        let Some(mut run) = self.read(id)? else { return Ok(()) };
        run.status = status;
        run.error = error;
        if status != RunStatus::Running {
            run.completed_at = Some(Utc::now());
        }
        self.write(&run)
    }

    async fn append_responses(&self, id: RunId, events: &[Value]) -> EngineResult<()> {
        let Some(mut run) = self.read(id)? else { return Ok(()) };
        run.responses.extend_from_slice(events);
        self.write(&run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        let run = AgentRun::new(RunId::new(), ThreadId::new());
        let id = run.id;
        store.insert(run).await.unwrap();

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn update_status_sets_completed_at_for_terminal_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        let run = AgentRun::new(RunId::new(), ThreadId::new());
        let id = run.id;
        store.insert(run).await.unwrap();

        store.update_status(id, RunStatus::Completed, None).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Completed);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn list_running_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRunStore::new(dir.path()).unwrap();
        let thread_id = ThreadId::new();
        let a = AgentRun::new(RunId::new(), thread_id);
        let b = AgentRun::new(RunId::new(), thread_id);
        let b_id = b.id;
        store.insert(a).await.unwrap();
        store.insert(b).await.unwrap();
        store.update_status(b_id, RunStatus::Failed, Some("boom".to_string())).await.unwrap();

        let running = store.list_running().await.unwrap();
        assert_eq!(running.len(), 1);
    }
}
