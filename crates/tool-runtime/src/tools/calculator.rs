use async_trait::async_trait;
use serde_json::Value;

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Evaluates a single binary arithmetic expression. Native-call-only.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "calculator".to_string(),
            description: "Evaluates a simple binary arithmetic expression (add, subtract, multiply, divide).".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "operation": { "type": "string", "enum": ["add", "subtract", "multiply", "divide"] },
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["operation", "a", "b"]
            }),
            markup: None,
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let op = input
            .get("operation")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'operation' field".to_string()))?;
        let a = input
            .get("a")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ToolError::InvalidInput("missing numeric 'a' field".to_string()))?;
        let b = input
            .get("b")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ToolError::InvalidInput("missing numeric 'b' field".to_string()))?;

        let result = match op {
            "add" => a + b,
            "subtract" => a - b,
            "multiply" => a * b,
            "divide" => {
                if b == 0.0 {
                    return Ok(ToolResult::err("", "calculator", "division by zero"));
                }
                a / b
            }
            other => return Err(ToolError::InvalidInput(format!("unknown operation '{other}'"))),
        };

        Ok(ToolResult::ok("", "calculator", result.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_two_numbers() {
        let tool = CalculatorTool;
        let ctx = ToolContext::default();
        let result = tool
            .execute(serde_json::json!({"operation": "add", "a": 2, "b": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "5");
    }

    #[tokio::test]
    async fn division_by_zero_is_a_tool_failure_not_an_error() {
        let tool = CalculatorTool;
        let ctx = ToolContext::default();
        let result = tool
            .execute(serde_json::json!({"operation": "divide", "a": 1, "b": 0}), &ctx)
            .await
            .unwrap();
        assert!(!result.success);
    }
}
