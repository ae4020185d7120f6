//! Tool manager

use std::sync::Arc;

use async_trait::async_trait;

use crate::protocol::{ExecutionRequest, Tool, ToolResult};
use crate::{Error, Result};

use super::store::{Capability, CapabilityStore, ListChangedCallback};

/// Executable behavior bound to a tool by its adapter.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke the upstream operation this tool fronts.
    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult>;
}

/// A tool descriptor together with its bound handler.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Wire descriptor
    pub tool: Tool,
    /// Bound upstream invocation
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    /// Pair a descriptor with its handler.
    #[must_use]
    pub fn new(tool: Tool, handler: Arc<dyn ToolHandler>) -> Self {
        Self { tool, handler }
    }
}

impl Capability for RegisteredTool {
    type Descriptor = Tool;

    fn key(&self) -> &str {
        &self.tool.name
    }
    fn service_key(&self) -> &str {
        &self.tool.service_id
    }
    fn descriptor(&self) -> Tool {
        self.tool.clone()
    }
}

/// Registry of executable tools keyed by name
pub struct ToolManager {
    store: CapabilityStore<RegisteredTool>,
}

impl ToolManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { store: CapabilityStore::new("tool") }
    }

    /// O(1) lookup by tool name.
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<RegisteredTool> {
        self.store.get(name)
    }

    /// Insert or overwrite a tool. Fires the list-changed callback once.
    pub fn add_tool(&self, tool: RegisteredTool) {
        self.store.add(tool);
    }

    /// Remove a tool by name; no-op when absent.
    pub fn remove_tool(&self, name: &str) -> bool {
        self.store.remove(name)
    }

    /// Snapshot of all tool descriptors (defensive copy).
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.store.list()
    }

    /// Remove every tool owned by `service_id`; returns how many went away.
    pub fn clear_tools_for_service(&self, service_id: &str) -> usize {
        self.store.clear_for_service(service_id)
    }

    /// Number of tools owned by `service_id`. O(1).
    #[must_use]
    pub fn tool_count_for_service(&self, service_id: &str) -> usize {
        self.store.count_for_service(service_id)
    }

    /// Total number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the single list-changed callback.
    pub fn on_list_changed(&self, callback: ListChangedCallback) {
        self.store.set_on_changed(callback);
    }

    /// Execute a tool by name. The handler runs outside the manager lock.
    pub async fn execute(&self, name: &str, request: ExecutionRequest) -> Result<ToolResult> {
        let registered = self
            .get_tool(name)
            .ok_or_else(|| Error::Tool(format!("tool \"{name}\" not found")))?;
        registered.handler.execute(request).await
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult> {
            Ok(ToolResult::Json(serde_json::Value::Object(request.arguments)))
        }
    }

    fn tool(name: &str, service: &str) -> RegisteredTool {
        RegisteredTool::new(
            Tool {
                name: name.into(),
                service_id: service.into(),
                title: None,
                description: None,
                input_schema: json!({"type": "object"}),
                output_schema: None,
                annotations: None,
                cache_ttl_secs: None,
                underlying_method_fqn: None,
            },
            Arc::new(EchoHandler),
        )
    }

    #[tokio::test]
    async fn execute_routes_to_handler() {
        let manager = ToolManager::new();
        manager.add_tool(tool("echo", "svc"));

        let mut args = serde_json::Map::new();
        args.insert("a".into(), json!(1));
        let result = manager.execute("echo", ExecutionRequest { arguments: args }).await.unwrap();
        assert_eq!(result, ToolResult::Json(json!({"a": 1})));
    }

    #[tokio::test]
    async fn execute_unknown_tool_fails() {
        let manager = ToolManager::new();
        let err = manager.execute("nope", ExecutionRequest::empty()).await.unwrap_err();
        assert!(err.to_string().contains("\"nope\" not found"));
    }

    #[test]
    fn per_service_counting() {
        let manager = ToolManager::new();
        manager.add_tool(tool("a", "s1"));
        manager.add_tool(tool("b", "s1"));
        manager.add_tool(tool("c", "s2"));

        assert_eq!(manager.tool_count_for_service("s1"), 2);
        assert_eq!(manager.clear_tools_for_service("s1"), 2);
        assert_eq!(manager.tool_count_for_service("s1"), 0);
        assert_eq!(manager.tool_count_for_service("s2"), 1);
        assert_eq!(manager.len(), 1);
    }
}
