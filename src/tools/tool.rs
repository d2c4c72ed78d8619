//! Tool trait and result type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::types::Message;

/// A capability the analysis model may invoke for a specific message.
///
/// Tools hold no per-message state. Side effects go through the services
/// injected at construction.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name the model uses to call the tool.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the `parameters` object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether the tool may be offered for this message.
    async fn is_available(&self, message: &Message) -> bool;

    /// Run the tool. Failures are reported in the result, never as `Err`.
    async fn execute(&self, message: &Message, params: serde_json::Value) -> ToolResult;
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Tool description handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}
