use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Echoes back its input. Native-call-only; exists mainly for exercising the
/// processor's execution path in tests.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input message.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "The message to echo back" }
                },
                "required": ["message"]
            }),
            markup: None,
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;
        Ok(ToolResult::ok("", "echo", message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_message_back() {
        let tool = EchoTool;
        let ctx = ToolContext::default();
        let result = tool.execute(serde_json::json!({"message": "hi"}), &ctx).await.unwrap();
        assert_eq!(result.output, "hi");
        assert!(result.success);
    }

    #[tokio::test]
    async fn rejects_missing_message() {
        let tool = EchoTool;
        let ctx = ToolContext::default();
        assert!(tool.execute(serde_json::json!({}), &ctx).await.is_err());
    }
}
