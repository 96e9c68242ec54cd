pub mod bridge;
pub mod mcp;

pub use mcp::McpToolClient;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool as advertised by the tool server (`tools/list` wire shape).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The two tool-server operations the run loop depends on.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke one tool. The result is the raw `tools/call` payload,
    /// typically `{"content": [{"type": "text", "text": ...}]}`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}
