use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub context_manager: ContextManagerConfig,
    pub pubsub: PubSubConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            storage: StorageConfig::from_env(),
            llm: LlmConfig::from_env(),
            context_manager: ContextManagerConfig::from_env(),
            pubsub: PubSubConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("config loaded:");
        tracing::info!("  server:          host={} port={}", self.server.host, self.server.port);
        tracing::info!("  storage:         data_dir={}", self.storage.data_dir.display());
        tracing::info!("  llm:             provider={} model={}", self.llm.provider, self.llm.model);
        tracing::info!(
            "  context_manager: token_threshold={}",
            self.context_manager.token_threshold
        );
        tracing::info!("  pubsub:          backend={}", self.pubsub.backend);
    }

    /// Redacted view safe for an API response (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "server": { "host": self.server.host, "port": self.server.port },
            "storage": { "data_dir": self.storage.data_dir },
            "llm": {
                "provider": self.llm.provider,
                "model": self.llm.model,
                "configured": self.llm.is_configured(),
            },
            "context_manager": { "token_threshold": self.context_manager.token_threshold },
            "pubsub": { "backend": self.pubsub.backend },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    /// Wall-clock bound on `GET /agent-run/{id}/stream` waiting for the next
    /// event before the connection is closed cleanly.
    pub stream_timeout_secs: u64,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_u16("PORT", 3001),
            cors_origin: env_or("CORS_ORIGIN", "*"),
            stream_timeout_secs: env_u32("STREAM_TIMEOUT_SECS", 300) as u64,
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
        }
    }
}

// ── LLM gateway ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" or "mock" (mock needs no credentials and is the default so
    /// the server boots without external setup).
    pub provider: String,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub native_max_auto_continues: u32,
    /// 0 means unbounded.
    pub max_xml_tool_calls: u32,
}

impl LlmConfig {
    fn from_env() -> Self {
        Self {
            provider: env_or("LLM_PROVIDER", "mock"),
            api_key: env_opt("LLM_API_KEY"),
            model: env_or("LLM_MODEL", "gpt-4o-mini"),
            base_url: env_opt("LLM_BASE_URL"),
            temperature: env_f32("LLM_TEMPERATURE", 0.1),
            max_tokens: env_u32("LLM_MAX_TOKENS", 4096),
            native_max_auto_continues: env_u32("NATIVE_MAX_AUTO_CONTINUES", 3),
            max_xml_tool_calls: env_u32("MAX_XML_TOOL_CALLS", 0),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self.provider.as_str() {
            "openai" => self.api_key.is_some(),
            "mock" => true,
            _ => false,
        }
    }
}

// ── Context Manager ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextManagerConfig {
    /// Estimated-token threshold (chars/4 heuristic) above which
    /// `check_and_summarize_if_needed` summarizes effective history.
    pub token_threshold: usize,
}

impl ContextManagerConfig {
    fn from_env() -> Self {
        Self {
            token_threshold: env_u32("CONTEXT_TOKEN_THRESHOLD", 100_000) as usize,
        }
    }
}

// ── Pub/Sub ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// "broadcast" (in-process, single instance) or "redis" (cross-instance).
    pub backend: String,
    pub redis_url: Option<String>,
    /// TTL (seconds) for `active_run:<instance>:<run_id>` liveness keys.
    pub active_run_ttl_secs: u64,
    /// How often the Run Task refreshes its active-run TTL key.
    pub active_run_refresh_secs: u64,
}

impl PubSubConfig {
    fn from_env() -> Self {
        Self {
            backend: env_or("PUBSUB_BACKEND", "broadcast"),
            redis_url: env_opt("REDIS_URL"),
            active_run_ttl_secs: env_u32("ACTIVE_RUN_TTL_SECS", 30) as u64,
            active_run_refresh_secs: env_u32("ACTIVE_RUN_REFRESH_SECS", 10) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_env_vars() {
        let cfg = LlmConfig::from_env();
        assert!(cfg.is_configured());
        assert_eq!(cfg.provider, "mock");
    }

    #[test]
    fn redacted_summary_omits_api_key() {
        let cfg = Config::from_env();
        let json = cfg.redacted_summary().to_string();
        assert!(!json.contains("api_key"));
    }
}
