use crate::tool::{ParamSource, Tool, ToolDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// A markup tool lookup result: the callable plus its tag's parameter mapping.
pub struct MarkupLookup {
    pub tool: Arc<dyn Tool>,
    pub definition: ToolDefinition,
}

/// Process-singleton tool registry. Two indexes: by function name (native
/// calls) and by markup tag (embedded calls). Consulted but never mutated
/// during a run.
pub struct ToolRegistry {
    by_name: HashMap<String, Arc<dyn Tool>>,
    by_tag: HashMap<String, String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_tag: HashMap::new(),
        }
    }

    /// Register a tool. Collisions (duplicate name or duplicate tag) are a
    /// programmer error and fail fast.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        let def = tool.definition();
        if self.by_name.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        if let Some(markup) = &def.markup {
            if self.by_tag.contains_key(&markup.tag_name) {
                return Err(RegistryError::DuplicateTag(markup.tag_name.clone()));
            }
        }
        if let Some(markup) = &def.markup {
            self.by_tag.insert(markup.tag_name.clone(), def.name.clone());
        }
        self.by_name.insert(def.name.clone(), Arc::new(tool));
        Ok(())
    }

    /// Look up a tool by native function name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.by_name.get(name).cloned()
    }

    /// Look up a tool by its markup tag, returning the callable plus its
    /// parameter mapping.
    pub fn get_by_tag(&self, tag: &str) -> Option<MarkupLookup> {
        let name = self.by_tag.get(tag)?;
        let tool = self.by_name.get(name)?.clone();
        let definition = tool.definition();
        Some(MarkupLookup { tool, definition })
    }

    /// All registered markup tag names, for the streaming scanner.
    pub fn markup_tags(&self) -> Vec<String> {
        self.by_tag.keys().cloned().collect()
    }

    /// Native schemas for sending to the LLM.
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.by_name.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Concatenates, for each registered markup tool, a fenced example built
    /// from its tag name and parameter mappings — for injection into the
    /// system prompt when `include_xml_examples` is set.
    pub fn render_xml_examples(&self) -> String {
        let mut out = String::new();
        let mut names: Vec<&String> = self.by_tag.values().collect();
        names.sort();
        for name in names {
            let Some(tool) = self.by_name.get(name) else { continue };
            let def = tool.definition();
            let Some(markup) = &def.markup else { continue };
            out.push_str(&render_one_example(&def, markup));
        }
        out
    }
}

fn render_one_example(def: &ToolDefinition, markup: &crate::tool::MarkupSchema) -> String {
    let attrs: String = markup
        .mappings
        .iter()
        .filter(|m| m.source == ParamSource::Attribute)
        .map(|m| format!(r#" {}="..." "#, m.path))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string();

    let open_tag = if attrs.is_empty() {
        format!("<{}>", markup.tag_name)
    } else {
        format!("<{} {}>", markup.tag_name, attrs)
    };

    let mut body = String::new();
    for m in &markup.mappings {
        match m.source {
            ParamSource::RootTextContent => body.push_str(&format!("...{}...", m.param_name)),
            ParamSource::ChildElement => {
                body.push_str(&format!("\n  <{}>...{}...</{}>\n", m.path, m.param_name, m.path))
            }
            ParamSource::Attribute => {}
        }
    }

    format!(
        "Example — {}:\n```xml\n{}{}</{}>\n```\n",
        def.name, open_tag, body, markup.tag_name
    )
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool with name '{0}' is already registered")]
    DuplicateName(String),
    #[error("markup tag '{0}' is already registered")]
    DuplicateTag(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn register_and_lookup_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(registry.register(EchoTool).is_err());
    }

    #[test]
    fn list_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        let defs = registry.list();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }
}
