pub mod config;
pub mod error;
pub mod ids;

pub use config::Config;
pub use error::EngineError;
pub use ids::{MessageId, RunId, ThreadId};
