//! Three channel families keyed by run id, fanning out over
//! `tokio::sync::broadcast` — grounded on the teacher's `AppState::broadcast`
//! + `live.rs::ws_upgrade` fan-out pattern, generalized from one process-wide
//! channel to one channel per run id per family.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use agentrun_core::RunId;

/// Published on a run's control channel(s) to request cooperative stop.
pub const STOP_SIGNAL: &str = "STOP";
/// Published on a run's control channel(s) once the Run Task has exited,
/// regardless of terminal status.
pub const END_STREAM_SIGNAL: &str = "END_STREAM";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Family {
    Events,
    Control,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    run_id: RunId,
    instance: String,
}

/// In-process pub/sub hub: `agent_run:<id>:events`, `agent_run:<id>:control`,
/// `agent_run:<id>:control:<instance>`.
pub struct PubSubHub {
    events: RwLock<HashMap<RunId, broadcast::Sender<String>>>,
    control: RwLock<HashMap<RunId, broadcast::Sender<String>>>,
    instance_control: RwLock<HashMap<InstanceKey, broadcast::Sender<String>>>,
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubHub {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            control: RwLock::new(HashMap::new()),
            instance_control: RwLock::new(HashMap::new()),
        }
    }

    async fn sender_for(map: &RwLock<HashMap<RunId, broadcast::Sender<String>>>, run_id: RunId) -> broadcast::Sender<String> {
        if let Some(tx) = map.read().await.get(&run_id) {
            return tx.clone();
        }
        let mut guard = map.write().await;
        guard.entry(run_id).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
    }

    pub async fn publish_event(&self, run_id: RunId, payload: String) {
        let tx = Self::sender_for(&self.events, run_id).await;
        let _ = tx.send(payload);
    }

    pub async fn subscribe_events(&self, run_id: RunId) -> broadcast::Receiver<String> {
        Self::sender_for(&self.events, run_id).await.subscribe()
    }

    pub async fn publish_control(&self, run_id: RunId, payload: &str) {
        let tx = Self::sender_for(&self.control, run_id).await;
        let _ = tx.send(payload.to_string());
    }

    pub async fn subscribe_control(&self, run_id: RunId) -> broadcast::Receiver<String> {
        Self::sender_for(&self.control, run_id).await.subscribe()
    }

    pub async fn publish_instance_control(&self, run_id: RunId, instance: &str, payload: &str) {
        let key = InstanceKey { run_id, instance: instance.to_string() };
        let tx = {
            if let Some(tx) = self.instance_control.read().await.get(&key) {
                tx.clone()
            } else {
                let mut guard = self.instance_control.write().await;
                guard.entry(key).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
            }
        };
        let _ = tx.send(payload.to_string());
    }

    pub async fn subscribe_instance_control(&self, run_id: RunId, instance: &str) -> broadcast::Receiver<String> {
        let key = InstanceKey { run_id, instance: instance.to_string() };
        if let Some(tx) = self.instance_control.read().await.get(&key) {
            return tx.subscribe();
        }
        let mut guard = self.instance_control.write().await;
        guard.entry(key).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).subscribe()
    }

    /// Publishes `STOP` on both the global and (if given) per-instance
    /// control channels, as the Supervisor's `stop` operation requires.
    pub async fn broadcast_stop(&self, run_id: RunId, instance: Option<&str>) {
        self.publish_control(run_id, STOP_SIGNAL).await;
        if let Some(instance) = instance {
            self.publish_instance_control(run_id, instance, STOP_SIGNAL).await;
        }
    }

    pub async fn broadcast_end_stream(&self, run_id: RunId, instance: &str) {
        self.publish_control(run_id, END_STREAM_SIGNAL).await;
        self.publish_instance_control(run_id, instance, END_STREAM_SIGNAL).await;
    }

    /// Drops the per-run channels once a run reaches a terminal state, so the
    /// hub does not grow unbounded across the process lifetime.
    pub async fn cleanup_run(&self, run_id: RunId) {
        self.events.write().await.remove(&run_id);
        self.control.write().await.remove(&run_id);
        self.instance_control.write().await.retain(|key, _| key.run_id != run_id);
    }
}

pub type SharedPubSubHub = Arc<PubSubHub>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_published_after_subscribe_are_received_in_order() {
        let hub = PubSubHub::new();
        let run_id = RunId::new();
        let mut rx = hub.subscribe_events(run_id).await;

        hub.publish_event(run_id, "one".to_string()).await;
        hub.publish_event(run_id, "two".to_string()).await;

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn broadcast_stop_reaches_both_global_and_instance_channels() {
        let hub = PubSubHub::new();
        let run_id = RunId::new();
        let mut global_rx = hub.subscribe_control(run_id).await;
        let mut instance_rx = hub.subscribe_instance_control(run_id, "worker-1").await;

        hub.broadcast_stop(run_id, Some("worker-1")).await;

        assert_eq!(global_rx.recv().await.unwrap(), STOP_SIGNAL);
        assert_eq!(instance_rx.recv().await.unwrap(), STOP_SIGNAL);
    }

    #[tokio::test]
    async fn cleanup_removes_channels_for_the_run_only() {
        let hub = PubSubHub::new();
        let a = RunId::new();
        let b = RunId::new();
        let _rx_a = hub.subscribe_events(a).await;
        let _rx_b = hub.subscribe_events(b).await;

        hub.cleanup_run(a).await;

        assert!(!hub.events.read().await.contains_key(&a));
        assert!(hub.events.read().await.contains_key(&b));
    }
}
