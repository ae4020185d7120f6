//! Dynamic resources backed by a tool invocation

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::managers::ToolManager;
use crate::protocol::{ExecutionRequest, Resource, ResourceContents, ToolResult};
use crate::{Error, Result};

use super::ReadableResource;

/// Resource whose contents are produced by executing a tool.
///
/// The backing tool is owned by the tool manager; the resource holds only
/// the tool's name and re-resolves it on every read, so a tool torn down by
/// its service cannot be invoked through a stale reference.
pub struct DynamicResource {
    definition: Resource,
    tool_name: String,
    tools: Arc<ToolManager>,
}

impl DynamicResource {
    /// Bind a resource definition to the named tool.
    #[must_use]
    pub fn new(definition: Resource, tool_name: impl Into<String>, tools: Arc<ToolManager>) -> Self {
        Self { definition, tool_name: tool_name.into(), tools }
    }

    fn coerce(&self, result: ToolResult) -> Result<ResourceContents> {
        let uri = self.definition.uri.clone();
        let mime_type = self.definition.mime_type.clone();
        match result {
            ToolResult::Text(text) => Ok(ResourceContents::Text { uri, mime_type, text }),
            ToolResult::Bytes(bytes) => {
                Ok(ResourceContents::Blob { uri, mime_type, blob: BASE64.encode(bytes) })
            }
            ToolResult::Json(value) => {
                let text = serde_json::to_string(&value).map_err(|_| {
                    Error::Resource("failed to marshal tool result to JSON".to_string())
                })?;
                Ok(ResourceContents::Text { uri, mime_type, text })
            }
        }
    }
}

#[async_trait]
impl ReadableResource for DynamicResource {
    fn definition(&self) -> &Resource {
        &self.definition
    }

    async fn read(&self) -> Result<Vec<ResourceContents>> {
        if self.tools.get_tool(&self.tool_name).is_none() {
            return Err(Error::Resource(format!(
                "resource \"{}\" refers to unknown tool \"{}\"",
                self.definition.uri, self.tool_name
            )));
        }
        let result = self.tools.execute(&self.tool_name, ExecutionRequest::empty()).await?;
        Ok(vec![self.coerce(result)?])
    }
}
