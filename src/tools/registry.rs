//! Tool registry for managing available tools
//!
//! The registry is built once at startup and shared read-only (`Arc`) by every
//! session. A [`ToolView`] narrows it to a session's allowlist.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::core::{AgentError, AgentResult};
use crate::llm::ToolSchema;

use super::tool::Tool;

/// Registry that holds all available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool in the registry
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> AgentResult<()> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool.
    ///
    /// Registering the same definition twice is a no-op. Registering a name
    /// again with a different schema or isolation class is a configuration
    /// error.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> AgentResult<()> {
        let name = tool.name().to_string();

        if let Some(existing) = self.tools.get(&name) {
            let same = existing.input_schema() == tool.input_schema()
                && existing.output_schema() == tool.output_schema()
                && existing.isolation() == tool.isolation();
            if same {
                tracing::debug!("[ToolRegistry] Tool '{}' already registered", name);
                return Ok(());
            }
            return Err(AgentError::config(format!(
                "Tool '{}' registered twice with different definitions",
                name
            )));
        }

        tracing::info!("[ToolRegistry] Registering tool: {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions, sorted by name
    pub fn definitions(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    /// Get the list of tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .finish()
    }
}

/// The tools one session may call
#[derive(Clone, Debug)]
pub struct ToolView {
    registry: Arc<ToolRegistry>,
    allowed: Option<BTreeSet<String>>,
    hidden: BTreeSet<String>,
}

impl ToolView {
    /// Every registered tool
    pub fn all(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            allowed: None,
            hidden: BTreeSet::new(),
        }
    }

    /// Narrow to an allowlist. Names outside the current view stay excluded.
    pub fn restrict(&self, allowlist: &[String]) -> Self {
        let requested: BTreeSet<String> = allowlist.iter().cloned().collect();
        let allowed = match &self.allowed {
            Some(current) => current.intersection(&requested).cloned().collect(),
            None => requested,
        };
        Self {
            registry: self.registry.clone(),
            allowed: Some(allowed),
            hidden: self.hidden.clone(),
        }
    }

    /// Remove one tool from the view
    pub fn without(&self, name: &str) -> Self {
        let mut view = self.clone();
        view.hidden.insert(name.to_string());
        view
    }

    fn permits(&self, name: &str) -> bool {
        !self.hidden.contains(name)
            && self.allowed.as_ref().map_or(true, |a| a.contains(name))
    }

    /// Resolve a tool visible to this session
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if self.permits(name) {
            self.registry.get(name)
        } else {
            None
        }
    }

    pub fn definitions(&self) -> Vec<ToolSchema> {
        self.registry
            .definitions()
            .into_iter()
            .filter(|d| self.permits(&d.name))
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry
            .tool_names()
            .into_iter()
            .filter(|n| self.permits(n))
            .map(str::to_string)
            .collect()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolError;
    use crate::tools::{Isolation, ToolContext};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Named {
        name: &'static str,
        schema: Value,
        isolation: Isolation,
    }

    fn named(name: &'static str) -> Named {
        Named {
            name,
            schema: json!({"type": "object"}),
            isolation: Isolation::None,
        }
    }

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn input_schema(&self) -> Value {
            self.schema.clone()
        }

        fn isolation(&self) -> Isolation {
            self.isolation
        }

        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = ToolRegistry::new();
        registry.register(named("exec")).unwrap();
        registry.register(named("exec")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_conflicting_registration_is_config_error() {
        let mut registry = ToolRegistry::new();
        registry.register(named("exec")).unwrap();

        let err = registry
            .register(Named {
                schema: json!({"type": "object", "required": ["command"]}),
                ..named("exec")
            })
            .unwrap_err();
        assert!(matches!(err, AgentError::FatalConfig(_)));

        let err = registry
            .register(Named {
                isolation: Isolation::Subprocess,
                ..named("exec")
            })
            .unwrap_err();
        assert!(matches!(err, AgentError::FatalConfig(_)));
    }

    #[test]
    fn test_definitions_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(named("write_file")).unwrap();
        registry.register(named("exec")).unwrap();
        registry.register(named("read_file")).unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["exec", "read_file", "write_file"]);
    }

    #[test]
    fn test_view_allowlist_only_narrows() {
        let mut registry = ToolRegistry::new();
        for name in ["exec", "read_file", "spawn"] {
            registry.register(named(name)).unwrap();
        }
        let root = ToolView::all(Arc::new(registry));

        let child = root.restrict(&["read_file".into(), "spawn".into()]);
        assert!(child.get("exec").is_none());
        assert!(child.get("read_file").is_some());

        let grandchild = child.restrict(&["exec".into(), "spawn".into()]);
        assert_eq!(grandchild.tool_names(), vec!["spawn".to_string()]);

        let leaf = grandchild.without("spawn");
        assert!(leaf.tool_names().is_empty());
        assert!(leaf.definitions().is_empty());
    }
}
