use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Where a markup parameter's value is extracted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ParamSource {
    /// An attribute on the tool's own opening tag.
    Attribute,
    /// The trimmed inner text of a named child element.
    ChildElement,
    /// Everything between the tool tag's own open/close, trimmed.
    RootTextContent,
}

/// One entry of a markup schema: parameter name, where to find it, and the
/// attribute/child-tag name (by convention ".", for root-text-content).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamMapping {
    pub param_name: String,
    pub source: ParamSource,
    pub path: String,
}

/// A markup (tag-embedded) calling convention for a tool, alongside its
/// native schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkupSchema {
    pub tag_name: String,
    pub mappings: Vec<ParamMapping>,
}

/// Describes a tool's interface for LLM consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g. "create_note").
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema describing the expected input.
    pub input_schema: Value,
    /// Markup calling convention, if this tool is also reachable via an
    /// embedded tag in assistant text.
    pub markup: Option<MarkupSchema>,
}

/// Represents an LLM (or markup parser) requesting execution of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for this invocation (used to match results). For native
    /// calls this comes from the provider; for markup calls it is derived
    /// deterministically from the matched chunk.
    pub id: String,
    pub name: String,
    /// JSON input arguments, already decoded to an object.
    pub input: Value,
}

/// Normalized result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self { tool_call_id: tool_call_id.into(), name: name.into(), success: true, output: output.into() }
    }

    pub fn err(tool_call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self { tool_call_id: tool_call_id.into(), name: name.into(), success: false, output: output.into() }
    }
}

/// Context handed to every tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub metadata: HashMap<String, String>,
}

/// The primary extension point: all tools implement this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_roundtrips() {
        let def = ToolDefinition {
            name: "test_tool".to_string(),
            description: "A test tool".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
            markup: None,
        };
        let json = serde_json::to_string(&def).unwrap();
        let roundtrip: ToolDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.name, "test_tool");
    }

    #[test]
    fn tool_result_carries_success_flag() {
        let result = ToolResult::err("call_1", "echo", "boom");
        assert!(!result.success);
        assert_eq!(result.tool_call_id, "call_1");
    }
}
