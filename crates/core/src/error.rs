use thiserror::Error;

/// One variant per error kind named by the engine's design: input validation,
/// LLM-provider failures, markup/argument parsing, tool execution, storage,
/// and pub/sub control-plane issues.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("input error: {0}")]
    Input(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("control-plane error: {0}")]
    Control(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
