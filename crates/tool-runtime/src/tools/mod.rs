//! Example tool implementations, registered by `crates/server` to exercise
//! both calling conventions: native function calls and markup-tag calls.

pub mod calculator;
pub mod create_note;
pub mod echo;

pub use calculator::CalculatorTool;
pub use create_note::CreateNoteTool;
pub use echo::EchoTool;
