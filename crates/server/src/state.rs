//! Process-wide shared state, grounded on the teacher's `AppState` —
//! an `Arc`-wrapped bag of collaborators threaded through Axum's
//! `State` extractor — trimmed to the Agent Run Engine's collaborators.

use std::sync::Arc;

use agentrun_agent::{FileRunStore, FileThreadStore, RunStore, ThreadStore};
use agentrun_core::Config;
use agentrun_llm::OpenAiProvider;
use agentrun_pubsub::{ActiveRunRegistry, InMemoryActiveRunRegistry, PubSubHub, SharedPubSubHub};
use agentrun_tool_runtime::{
    CalculatorTool, CreateNoteTool, EchoTool, MockLlmProvider, ToolAwareLlmProvider, ToolRegistry,
};

use crate::gateway::{AuthGateway, BillingGateway, PermissiveAuthGateway, PermissiveBillingGateway};
use crate::supervisor::AgentRunSupervisor;

pub struct AppState {
    pub config: Config,
    pub thread_store: Arc<dyn ThreadStore>,
    pub run_store: Arc<dyn RunStore>,
    pub registry: Arc<ToolRegistry>,
    pub provider: Arc<dyn ToolAwareLlmProvider>,
    pub pubsub: SharedPubSubHub,
    pub active_run: Arc<dyn ActiveRunRegistry>,
    pub auth: Arc<dyn AuthGateway>,
    pub billing: Arc<dyn BillingGateway>,
    pub supervisor: Arc<AgentRunSupervisor>,
}

fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool).expect("EchoTool registers cleanly");
    registry.register(CalculatorTool).expect("CalculatorTool registers cleanly");
    registry.register(CreateNoteTool::new()).expect("CreateNoteTool registers cleanly");
    registry
}

fn build_provider(config: &Config) -> Arc<dyn ToolAwareLlmProvider> {
    match config.llm.provider.as_str() {
        "openai" => {
            let api_key = config.llm.api_key.clone().expect("LLM_API_KEY must be set for LLM_PROVIDER=openai");
            let base_url = config.llm.base_url.clone().unwrap_or_else(|| "https://api.openai.com".to_string());
            Arc::new(OpenAiProvider::new(api_key, config.llm.model.clone(), base_url))
        }
        _ => Arc::new(MockLlmProvider::new()),
    }
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let thread_store: Arc<dyn ThreadStore> = Arc::new(FileThreadStore::new(&config.storage.data_dir)?);
        let run_store: Arc<dyn RunStore> = Arc::new(FileRunStore::new(&config.storage.data_dir)?);
        let registry = Arc::new(default_registry());
        let provider = build_provider(&config);
        let pubsub: SharedPubSubHub = Arc::new(PubSubHub::new());
        let active_run: Arc<dyn ActiveRunRegistry> = Arc::new(InMemoryActiveRunRegistry::new());
        let auth: Arc<dyn AuthGateway> = Arc::new(PermissiveAuthGateway);
        let billing: Arc<dyn BillingGateway> = Arc::new(PermissiveBillingGateway);

        let supervisor = Arc::new(AgentRunSupervisor::new(
            thread_store.clone(),
            run_store.clone(),
            registry.clone(),
            provider.clone(),
            pubsub.clone(),
            active_run.clone(),
            config.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            thread_store,
            run_store,
            registry,
            provider,
            pubsub,
            active_run,
            auth,
            billing,
            supervisor,
        }))
    }
}
