pub mod context_manager;
pub mod run;
pub mod thread;
pub mod thread_manager;

pub use context_manager::ContextManager;
pub use run::{AgentRun, FileRunStore, RunStatus, RunStore};
pub use thread::{effective_history, FileThreadStore, Message, Role, ThreadStore};
pub use thread_manager::{PassOutcome, RunPassState, RunThreadParams, ThreadManager};
