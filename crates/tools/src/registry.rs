//! Name-unique tool catalog.

use std::collections::HashMap;
use std::sync::Arc;

use muster_domain::{Error, Result};

use crate::tool::Tool;

/// Immutable-after-build catalog of tools, unique by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Rejects a second tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_owned();
        if self.tools.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// A new registry holding the union of `self` and `other`, with `other`
    /// winning on name conflicts. Neither source registry is mutated.
    pub fn extend(&self, other: &ToolRegistry) -> ToolRegistry {
        let mut tools = self.tools.clone();
        for (name, tool) in &other.tools {
            tools.insert(name.clone(), tool.clone());
        }
        ToolRegistry { tools }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tools, sorted by name.
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.values().cloned().collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    /// Tools in a category, sorted by name.
    pub fn by_category(&self, category: &str) -> Vec<Arc<dyn Tool>> {
        self.list()
            .into_iter()
            .filter(|t| t.category() == Some(category))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolContext;
    use crate::tool::ToolOutcome;
    use async_trait::async_trait;
    use muster_steps::StepResult;
    use serde_json::Value;

    struct NamedTool {
        name: &'static str,
        category: Option<&'static str>,
    }

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        fn category(&self) -> Option<&str> {
            self.category
        }
        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> StepResult<ToolOutcome> {
            Ok(ToolOutcome::success(Value::Null))
        }
    }

    fn tool(name: &'static str, category: Option<&'static str>) -> Arc<dyn Tool> {
        Arc::new(NamedTool { name, category })
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(tool("echo", None)).unwrap();
        assert!(reg.contains("echo"));
        assert_eq!(reg.get("echo").unwrap().name(), "echo");
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut reg = ToolRegistry::new();
        reg.register(tool("echo", None)).unwrap();
        let err = reg.register(tool("echo", None)).unwrap_err();
        assert!(matches!(err, Error::DuplicateTool(name) if name == "echo"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn extend_unions_with_other_precedence() {
        let mut base = ToolRegistry::new();
        base.register(tool("a", Some("files"))).unwrap();
        base.register(tool("b", None)).unwrap();

        let mut overlay = ToolRegistry::new();
        overlay.register(tool("b", Some("net"))).unwrap();
        overlay.register(tool("c", None)).unwrap();

        let merged = base.extend(&overlay);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("b").unwrap().category(), Some("net"));

        // Sources untouched.
        assert_eq!(base.len(), 2);
        assert_eq!(base.get("b").unwrap().category(), None);
        assert_eq!(overlay.len(), 2);
    }

    #[test]
    fn by_category_filters_and_sorts() {
        let mut reg = ToolRegistry::new();
        reg.register(tool("zeta", Some("files"))).unwrap();
        reg.register(tool("alpha", Some("files"))).unwrap();
        reg.register(tool("other", Some("net"))).unwrap();

        let files = reg.by_category("files");
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name(), "alpha");
        assert_eq!(files[1].name(), "zeta");
        assert!(reg.by_category("unknown").is_empty());
    }

    #[test]
    fn list_is_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(tool("b", None)).unwrap();
        reg.register(tool("a", None)).unwrap();
        let tools = reg.list();
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
