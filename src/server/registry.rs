//! Tool registry: name → handler, plus server-side tool descriptions.

use crate::error::ToolError;
use crate::protocol::{CallToolResult, Tool};
use crate::server::engine::ToolContext;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// A named capability. The shared handler acts as a factory: every
/// `tools/call` binds a fresh task (owning the request and its status) to it,
/// so handlers themselves stay stateless across invocations.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    /// Executes one invocation. The context carries the progress reporter
    /// and the cooperative cancellation flag for this call.
    async fn call(&self, ctx: ToolContext, arguments: Value) -> Result<CallToolResult, ToolError>;
}

pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn ToolHandler>>,
    // Pagination walks tools in registration order.
    order: RwLock<Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    pub fn register<T: ToolHandler + 'static>(&self, tool: T) {
        let definition = tool.definition();
        let name = definition.name.clone();
        debug!("Registering tool: {name}");
        if self.tools.insert(name.clone(), Arc::new(tool)).is_none() {
            self.order.write().push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|r| Arc::clone(&*r))
    }

    /// Tool definitions in registration order.
    pub fn definitions(&self) -> Vec<Tool> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|r| r.definition()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl ToolHandler for NamedTool {
        fn definition(&self) -> Tool {
            Tool {
                name: self.0.into(),
                description: "A test tool".into(),
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        async fn call(
            &self,
            _ctx: ToolContext,
            _arguments: Value,
        ) -> Result<CallToolResult, ToolError> {
            Ok(CallToolResult::text("test result"))
        }
    }

    #[test]
    fn test_registry() {
        let registry = ToolRegistry::new();
        registry.register(NamedTool("test_tool"));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("test_tool").is_some());
        assert!(registry.get("unknown").is_none());

        let tools = registry.definitions();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "test_tool");
    }

    #[test]
    fn test_definitions_follow_registration_order() {
        let registry = ToolRegistry::new();
        registry.register(NamedTool("zeta"));
        registry.register(NamedTool("alpha"));

        let names: Vec<_> = registry
            .definitions()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_reregistration_keeps_single_order_entry() {
        let registry = ToolRegistry::new();
        registry.register(NamedTool("dup"));
        registry.register(NamedTool("dup"));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions().len(), 1);
    }
}
