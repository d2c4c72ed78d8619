//! Tool registry: resolves tools by name and gates them per message.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::pipeline::types::Message;
use crate::tools::tool::{Tool, ToolDefinition, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().await.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced existing tool registration");
        }
        tracing::debug!("Registered tool: {}", name);
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// List all tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }

    /// Tools whose availability predicate passes for this message, sorted by name.
    pub async fn available_for(&self, message: &Message) -> Vec<Arc<dyn Tool>> {
        let tools: Vec<Arc<dyn Tool>> = self.tools.read().await.values().cloned().collect();

        let mut available = Vec::new();
        for tool in tools {
            let ok = tool.is_available(message).await;
            tracing::debug!(message_id = %message.id, tool = tool.name(), available = ok, "Tool availability check");
            if ok {
                available.push(tool);
            }
        }
        available.sort_by(|a, b| a.name().cmp(b.name()));

        tracing::info!(
            message_id = %message.id,
            registered = self.count(),
            available = available.len(),
            "Tool availability summary"
        );
        available
    }

    /// Definitions of the tools available for this message.
    pub async fn definitions_for(&self, message: &Message) -> Vec<ToolDefinition> {
        self.available_for(message)
            .await
            .iter()
            .map(|tool| ToolDefinition::of(tool.as_ref()))
            .collect()
    }

    /// Resolve, re-check availability, and run a tool.
    pub async fn execute(
        &self,
        message: &Message,
        name: &str,
        params: serde_json::Value,
    ) -> ToolResult {
        let Some(tool) = self.get(name).await else {
            tracing::warn!(message_id = %message.id, tool = name, "Unknown tool requested");
            return ToolResult::failure(format!("Tool '{name}' not found"));
        };

        if !tool.is_available(message).await {
            tracing::warn!(message_id = %message.id, tool = name, "Tool not available for message");
            return ToolResult::failure(format!("Tool '{name}' is not available for this email"));
        }

        let result = tool.execute(message, params).await;
        tracing::info!(
            message_id = %message.id,
            tool = name,
            success = result.success,
            "Tool executed"
        );
        result
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
    use async_trait::async_trait;

    struct MockTool {
        name: String,
        available: bool,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A mock tool for testing"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn is_available(&self, _message: &Message) -> bool {
            self.available
        }
        async fn execute(&self, _message: &Message, params: serde_json::Value) -> ToolResult {
            ToolResult::success(serde_json::json!({ "echo": params }))
        }
    }

    fn tool(name: &str, available: bool) -> Arc<dyn Tool> {
        Arc::new(MockTool {
            name: name.to_string(),
            available,
        })
    }

    fn message() -> Message {
        Message::fixture("m1", "Hello", "")
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(tool("test_tool", true)).await;

        assert!(registry.get("test_tool").await.is_some());
        assert!(registry.get("nonexistent").await.is_none());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_available_for_filters_by_predicate() {
        let registry = ToolRegistry::new();
        registry.register(tool("b_on", true)).await;
        registry.register(tool("off", false)).await;
        registry.register(tool("a_on", true)).await;

        let names: Vec<String> = registry
            .available_for(&message())
            .await
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["a_on", "b_on"]);

        let defs = registry.definitions_for(&message()).await;
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].description, "A mock tool for testing");
        assert_eq!(registry.list().await, vec!["a_on", "b_on", "off"]);
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute(&message(), "ghost", serde_json::json!({}))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Tool 'ghost' not found"));
    }

    #[tokio::test]
    async fn test_execute_rechecks_availability() {
        let registry = ToolRegistry::new();
        registry.register(tool("off", false)).await;
        let result = registry
            .execute(&message(), "off", serde_json::json!({}))
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Tool 'off' is not available for this email")
        );
    }

    #[tokio::test]
    async fn test_execute_runs_tool() {
        let registry = ToolRegistry::new();
        registry.register(tool("echo", true)).await;
        let result = registry
            .execute(&message(), "echo", serde_json::json!({"x": 1}))
            .await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["echo"]["x"], 1);
    }
}
