use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::tool::{MarkupSchema, ParamMapping, ParamSource, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};

/// Appends a note to an in-memory log. Reachable both as a native function
/// call (`create_note`) and as an embedded `<create_note title="...">body</create_note>`
/// tag, to exercise both calling conventions end to end.
pub struct CreateNoteTool {
    notes: Mutex<Vec<(String, String)>>,
}

impl CreateNoteTool {
    pub fn new() -> Self {
        Self { notes: Mutex::new(Vec::new()) }
    }

    pub fn notes(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap().clone()
    }
}

impl Default for CreateNoteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CreateNoteTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_note".to_string(),
            description: "Creates a titled note.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["title", "body"]
            }),
            markup: Some(MarkupSchema {
                tag_name: "create_note".to_string(),
                mappings: vec![
                    ParamMapping { param_name: "title".to_string(), source: ParamSource::Attribute, path: "title".to_string() },
                    ParamMapping { param_name: "body".to_string(), source: ParamSource::RootTextContent, path: ".".to_string() },
                ],
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let title = input
            .get("title")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'title' field".to_string()))?;
        let body = input
            .get("body")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'body' field".to_string()))?;

        self.notes.lock().unwrap().push((title.to_string(), body.to_string()));
        Ok(ToolResult::ok("", "create_note", format!("note '{title}' created")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_and_stores_a_note() {
        let tool = CreateNoteTool::new();
        let ctx = ToolContext::default();
        tool.execute(serde_json::json!({"title": "t", "body": "b"}), &ctx).await.unwrap();
        assert_eq!(tool.notes(), vec![("t".to_string(), "b".to_string())]);
    }
}
