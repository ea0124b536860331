//! The Agent Run Supervisor: owns run lifecycle (`start`/`stop`/`stream`/
//! `restore`) and the per-run Run Task, grounded on the teacher's pattern of
//! spawning a long-lived background task off `AppState` (`tokio::spawn` in
//! `main.rs`'s `serve()`) that publishes onto the same broadcast channel a
//! websocket handler subscribes to (`live.rs::ws_upgrade`).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use agentrun_agent::{
    AgentRun, ContextManager, Message, PassOutcome, Role, RunStatus, RunStore, RunThreadParams, ThreadManager,
    ThreadStore,
};
use agentrun_core::{EngineError, EngineResult, RunId, ThreadId};
use agentrun_pubsub::{ActiveRunRegistry, SharedPubSubHub, STOP_SIGNAL};
use agentrun_tool_runtime::{
    Event, ProcessorConfig, ToolAwareLlmProvider, ToolChoice, ToolExecutionStrategy, ToolRegistry,
    XmlAddingStrategy,
};

use agentrun_core::Config;

fn default_processor_config(max_xml_tool_calls: u32) -> ProcessorConfig {
    ProcessorConfig {
        execute_tools: true,
        native_tool_calling: true,
        xml_tool_calling: max_xml_tool_calls > 0,
        execute_on_stream: false,
        tool_execution_strategy: ToolExecutionStrategy::Sequential,
        xml_adding_strategy: XmlAddingStrategy::AssistantMessage,
        max_xml_tool_calls,
    }
}

type EventBuffer = Arc<RwLock<Vec<Event>>>;

/// Coarse persistence schedule (SPEC_FULL.md §4.5.1): the growing
/// `responses` array is flushed to the run store every this-many buffered
/// events, in addition to the unconditional flush once the run reaches a
/// terminal state, bounding crash loss to at most this many events.
const RESPONSES_PERSIST_INTERVAL: usize = 20;

pub struct AgentRunSupervisor {
    store: Arc<dyn ThreadStore>,
    runs: Arc<dyn RunStore>,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn ToolAwareLlmProvider>,
    pubsub: SharedPubSubHub,
    active_run: Arc<dyn ActiveRunRegistry>,
    config: Config,
    instance: String,
    buffers: RwLock<HashMap<RunId, EventBuffer>>,
}

impl AgentRunSupervisor {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        runs: Arc<dyn RunStore>,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn ToolAwareLlmProvider>,
        pubsub: SharedPubSubHub,
        active_run: Arc<dyn ActiveRunRegistry>,
        config: Config,
    ) -> Self {
        Self {
            store,
            runs,
            registry,
            provider,
            pubsub,
            active_run,
            config,
            instance: uuid::Uuid::new_v4().to_string(),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Marks every run left `running` at process start as `failed` — this
    /// instance never resumes a run task across a restart (§4.5/§9: no
    /// cross-instance migration).
    pub async fn restore(&self) -> EngineResult<usize> {
        let running = self.runs.list_running().await?;
        for run in &running {
            self.runs
                .update_status(run.id, RunStatus::Failed, Some("run left running across a restart".to_string()))
                .await?;
            self.active_run.delete(&self.instance, run.id).await.ok();
        }
        Ok(running.len())
    }

    /// Starts a new run for `thread_id`. A run already in progress for the
    /// thread is stopped first rather than refusing the request.
    pub async fn start(
        self: &Arc<Self>,
        thread_id: ThreadId,
        system_prompt: Value,
        temporary_message: Option<Value>,
    ) -> EngineResult<RunId> {
        if !self.store.thread_exists(thread_id).await? {
            return Err(EngineError::Input(format!("thread '{thread_id}' does not exist")));
        }

        for existing in self.runs.list_for_thread(thread_id).await?.into_iter().filter(|r| r.status == RunStatus::Running) {
            self.stop(existing.id).await.ok();
        }

        let run_id = RunId::new();
        self.runs.insert(AgentRun::new(run_id, thread_id)).await?;
        self.buffers.write().await.insert(run_id, Arc::new(RwLock::new(Vec::new())));
        self.active_run
            .set(&self.instance, run_id, Duration::from_secs(self.config.pubsub.active_run_ttl_secs))
            .await
            .ok();

        let params = RunThreadParams {
            thread_id,
            system_prompt,
            temporary_message,
            processor_config: default_processor_config(self.config.llm.max_xml_tool_calls),
            tool_choice: ToolChoice::Auto,
            temperature: self.config.llm.temperature,
            max_tokens: Some(self.config.llm.max_tokens),
            native_max_auto_continues: self.config.llm.native_max_auto_continues,
            include_xml_examples: self.config.llm.max_xml_tool_calls > 0,
            enable_context_manager: true,
        };

        let this = self.clone();
        tokio::spawn(async move { this.run_task(run_id, params).await });

        Ok(run_id)
    }

    /// Requests cooperative stop. A run stops at its next suspension point
    /// (await boundary) inside `run_thread`, not mid in-flight tool call.
    pub async fn stop(&self, run_id: RunId) -> EngineResult<()> {
        let run = self.runs.get(run_id).await?.ok_or_else(|| EngineError::Input(format!("agent run '{run_id}' not found")))?;
        if run.status != RunStatus::Running {
            return Ok(());
        }
        self.pubsub.broadcast_stop(run_id, Some(&self.instance)).await;
        Ok(())
    }

    pub async fn get_run(&self, run_id: RunId) -> EngineResult<Option<AgentRun>> {
        self.runs.get(run_id).await
    }

    pub async fn list_for_thread(&self, thread_id: ThreadId) -> EngineResult<Vec<AgentRun>> {
        self.runs.list_for_thread(thread_id).await
    }

    /// Replays the buffered prefix then forwards live events, bounded by
    /// `stream_timeout_secs` of inactivity (a clean end, not an error).
    pub async fn stream(&self, run_id: RunId) -> EngineResult<Pin<Box<dyn Stream<Item = Event> + Send>>> {
        let run = self.runs.get(run_id).await?.ok_or_else(|| EngineError::Input(format!("agent run '{run_id}' not found")))?;

        let buffer = self.buffers.read().await.get(&run_id).cloned();
        let (replayed, rx) = match buffer {
            Some(buffer) => {
                // Holding the read guard across the subscribe call serializes
                // against `push_event`'s write guard, so no event is ever
                // both in the replayed snapshot and the live channel, or
                // dropped between the two.
                let guard = buffer.read().await;
                let snapshot = guard.clone();
                let rx = self.pubsub.subscribe_events(run_id).await;
                drop(guard);
                (snapshot, Some(rx))
            }
            None => {
                let replayed = run
                    .responses
                    .iter()
                    .filter_map(|v| serde_json::from_value::<Event>(v.clone()).ok())
                    .collect();
                (replayed, None)
            }
        };

        let replay_stream = futures::stream::iter(replayed);

        let Some(rx) = rx else {
            // Run already ended and its live buffer was never materialized
            // (e.g. after a restart) — the persisted responses are all there is.
            return Ok(Box::pin(replay_stream));
        };

        let timeout = Duration::from_secs(self.config.server.stream_timeout_secs.max(1));
        let live_stream = BroadcastStream::new(rx)
            .filter_map(|item| async move { item.ok() })
            .filter_map(|payload| async move { serde_json::from_str::<Event>(&payload).ok() });

        // Yields the terminal status event itself, then closes on the next poll.
        let bounded_live = timeout_after_inactivity(live_stream, timeout);

        Ok(Box::pin(replay_stream.chain(bounded_live)))
    }

    /// Drives one run pass-by-pass, racing each individual pass (not the
    /// whole run) against the stop signal, so a stop mid-turn only abandons
    /// the in-flight pass — every already-produced event from earlier passes
    /// was already pushed to the buffer and stays (§4.3/§4.5).
    async fn run_task(self: Arc<Self>, run_id: RunId, params: RunThreadParams) {
        let Some(buffer) = self.buffers.read().await.get(&run_id).cloned() else { return };

        self.push_event(run_id, &buffer, Event::status("running")).await;

        let context_manager = ContextManager::new(self.config.context_manager.token_threshold as u32);
        let thread_manager = ThreadManager::new(self.store.clone(), self.registry.clone(), context_manager);

        let mut control_rx = self.pubsub.subscribe_control(run_id).await;
        let mut instance_rx = self.pubsub.subscribe_instance_control(run_id, &self.instance).await;

        let ttl = Duration::from_secs(self.config.pubsub.active_run_ttl_secs.max(1));
        let refresh_period = Duration::from_secs(self.config.pubsub.active_run_refresh_secs.max(1));
        let mut refresh_ticker = tokio::time::interval(refresh_period);
        refresh_ticker.tick().await; // first tick fires immediately; `start()` already set the key

        let mut state = thread_manager.begin_run(&params);
        let mut stopped = false;

        'passes: loop {
            let pass_fut = thread_manager.run_next_pass(self.provider.as_ref(), &params, &mut state);
            tokio::pin!(pass_fut);

            let outcome = 'race: loop {
                tokio::select! {
                    result = &mut pass_fut => break 'race Some(result),
                    _ = wait_for_stop(&mut control_rx, &mut instance_rx) => {
                        stopped = true;
                        break 'race None;
                    }
                    _ = refresh_ticker.tick() => {
                        self.active_run.refresh(&self.instance, run_id, ttl).await.ok();
                    }
                }
            };

            let Some(result) = outcome else { break 'passes };

            match result {
                Ok(PassOutcome::Continue { events }) => {
                    for event in events {
                        self.push_event(run_id, &buffer, event).await;
                    }
                }
                Ok(PassOutcome::Done { events }) => {
                    for event in events {
                        self.push_event(run_id, &buffer, event).await;
                    }
                    break 'passes;
                }
                Err(e) => {
                    self.push_event(run_id, &buffer, Event::error(e.to_string())).await;
                    break 'passes;
                }
            }
        }

        let final_status;
        let error_text;
        if stopped {
            final_status = RunStatus::Stopped;
            error_text = None;
            self.push_event(run_id, &buffer, Event::status("stopped")).await;
        } else {
            let snapshot = buffer.read().await;
            let had_error = snapshot.iter().any(|e| matches!(e, Event::Error { .. }));
            let error_message = snapshot.iter().rev().find_map(|e| match e {
                Event::Error { message } => Some(message.clone()),
                _ => None,
            });
            drop(snapshot);

            if had_error {
                final_status = RunStatus::Failed;
                error_text = error_message.clone();
                self.push_event(run_id, &buffer, Event::status_with("error", "error", error_message.unwrap_or_default())).await;
            } else {
                final_status = RunStatus::Completed;
                error_text = None;
                self.push_event(run_id, &buffer, Event::status("completed")).await;
            }
        }

        if let Err(e) = self.runs.update_status(run_id, final_status, error_text).await {
            warn!(%run_id, error = %e, "failed to persist terminal run status");
        }

        self.persist_responses(run_id, &buffer).await;

        self.active_run.delete(&self.instance, run_id).await.ok();
        // End-stream must go out before cleanup: it recreates the control
        // channels via publish, so cleaning up first would just leave a
        // fresh, never-cleaned entry behind.
        self.pubsub.broadcast_end_stream(run_id, &self.instance).await;
        self.buffers.write().await.remove(&run_id);
        self.pubsub.cleanup_run(run_id).await;
        info!(%run_id, status = ?final_status, "agent run finished");
    }

    async fn push_event(&self, run_id: RunId, buffer: &EventBuffer, event: Event) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        // Holding the write guard across the publish call is what makes the
        // `stream` method's replay-snapshot-then-subscribe sequencing safe.
        let mut guard = buffer.write().await;
        guard.push(event);
        let len = guard.len();
        self.pubsub.publish_event(run_id, payload).await;

        if len % RESPONSES_PERSIST_INTERVAL == 0 {
            drop(guard);
            self.persist_responses(run_id, buffer).await;
        }
    }

    /// Flushes the buffer's current contents to the run store. Called on the
    /// coarse schedule from `push_event` and unconditionally once more when
    /// the run reaches a terminal state.
    async fn persist_responses(&self, run_id: RunId, buffer: &EventBuffer) {
        let responses: Vec<Value> = buffer.read().await.iter().map(|e| serde_json::to_value(e).unwrap_or(Value::Null)).collect();
        if let Err(e) = self.runs.append_responses(run_id, &responses).await {
            warn!(%run_id, error = %e, "failed to persist run responses");
        }
    }

    /// Appends a user-role message and persists it before a run starts,
    /// mirroring `ThreadManager::add_message` for the HTTP entry point.
    pub async fn add_user_message(&self, thread_id: ThreadId, content: Value) -> EngineResult<()> {
        if !self.store.thread_exists(thread_id).await? {
            return Err(EngineError::Input(format!("thread '{thread_id}' does not exist")));
        }
        let message = Message {
            id: agentrun_core::MessageId::new(),
            thread_id,
            role: Role::User,
            content,
            native_tool_calls: vec![],
            tool_call_id: None,
            is_llm_message: true,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        };
        self.store.append_message(thread_id, message).await
    }
}

/// Resolves once a stop signal arrives on either channel, or a channel
/// closes. Takes the receivers by `&mut` so the same pair can be raced
/// repeatedly across passes without losing their read position between
/// calls.
async fn wait_for_stop(control_rx: &mut broadcast::Receiver<String>, instance_rx: &mut broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            res = control_rx.recv() => {
                match res {
                    Ok(sig) if sig == STOP_SIGNAL => return,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
            res = instance_rx.recv() => {
                match res {
                    Ok(sig) if sig == STOP_SIGNAL => return,
                    Ok(_) => continue,
                    Err(_) => return,
                }
            }
        }
    }
}

/// Ends the stream cleanly after `timeout` of inactivity, rather than
/// erroring — §5's "stream endpoint bounded timeout = clean end".
fn timeout_after_inactivity<S>(stream: S, timeout: Duration) -> impl Stream<Item = Event> + Send
where
    S: Stream<Item = Event> + Send + 'static,
{
    futures::stream::unfold((Box::pin(stream), false), move |(mut stream, done)| async move {
        if done {
            return None;
        }
        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(event)) => {
                let is_terminal = event.is_terminal_status();
                Some((event, (stream, is_terminal)))
            }
            Ok(None) => None,
            Err(_) => None,
        }
    })
}
