//! Capability value type definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool name (unique within the tool manager)
    pub name: String,
    /// Owning service key (sanitized service name)
    #[serde(rename = "serviceId")]
    pub service_id: String,
    /// Human-readable display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON Schema fragment
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
    /// Output JSON Schema fragment
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Behavior hints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
    /// Response cache TTL in seconds, carried from the tool's declaration
    #[serde(rename = "cacheTtlSecs", default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
    /// Fully-qualified upstream method, e.g. `"GET /users/{id}"`.
    ///
    /// Split only at the first space when reconstructing method and path;
    /// the path may itself contain spaces.
    #[serde(rename = "underlyingMethodFqn", skip_serializing_if = "Option::is_none")]
    pub underlying_method_fqn: Option<String>,
}

impl Tool {
    /// Split `underlying_method_fqn` into (method, path) at the first space.
    #[must_use]
    pub fn method_and_path(&self) -> Option<(&str, &str)> {
        self.underlying_method_fqn
            .as_deref()
            .and_then(|fqn| fqn.split_once(' '))
    }
}

/// Tool annotations (hints about tool behavior)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolAnnotations {
    /// If true, tool does not modify external state
    #[serde(rename = "readOnlyHint", skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    /// If true, repeated calls with the same arguments have the same effect
    #[serde(rename = "idempotentHint", skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    /// If true, tool interacts with external entities
    #[serde(rename = "openWorldHint", skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

/// Resource descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI (unique within the resource manager)
    pub uri: String,
    /// Resource name
    pub name: String,
    /// Owning service key
    #[serde(rename = "serviceId")]
    pub service_id: String,
    /// Resource description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size in bytes; doubles as the read ceiling for URL-backed resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

/// Resource contents returned by a read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    /// Text contents
    Text {
        /// Resource URI
        uri: String,
        /// MIME type
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Text content
        text: String,
    },
    /// Binary contents
    Blob {
        /// Resource URI
        uri: String,
        /// MIME type
        #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Base64-encoded blob data
        blob: String,
    },
}

/// Prompt descriptor with templated messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name (unique within the prompt manager)
    pub name: String,
    /// Owning service key
    #[serde(rename = "serviceId")]
    pub service_id: String,
    /// Prompt description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
    /// Templated messages; `{argument}` placeholders substitute at render time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<PromptMessage>,
}

/// Prompt argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,
    /// Argument description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument is required
    #[serde(default)]
    pub required: bool,
}

/// Single templated prompt message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role (`user`, `assistant`, `system`)
    pub role: String,
    /// Message text template
    pub content: String,
}

impl PromptMessage {
    /// Render the template, substituting `{name}` placeholders.
    #[must_use]
    pub fn render(&self, arguments: &serde_json::Map<String, Value>) -> String {
        let mut text = self.content.clone();
        for (name, value) in arguments {
            let placeholder = format!("{{{name}}}");
            if text.contains(&placeholder) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                text = text.replace(&placeholder, &rendered);
            }
        }
        text
    }
}

/// Request passed to a tool handler on execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Arguments keyed by input-schema property name
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
}

impl ExecutionRequest {
    /// An execution request carrying no arguments.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Result produced by a tool handler
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// Plain text result
    Text(String),
    /// Raw binary result
    Bytes(Vec<u8>),
    /// Structured result (mapping, sequence, primitive or null)
    Json(Value),
}

impl ToolResult {
    /// True when the result carries no data (`Json(null)`).
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Json(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fqn_splits_on_first_space_only() {
        let tool = Tool {
            name: "t".into(),
            service_id: "svc".into(),
            title: None,
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: None,
            cache_ttl_secs: None,
            underlying_method_fqn: Some("GET /path with space".into()),
        };
        assert_eq!(tool.method_and_path(), Some(("GET", "/path with space")));
    }

    #[test]
    fn prompt_message_renders_placeholders() {
        let msg = PromptMessage {
            role: "user".into(),
            content: "Summarize {topic} in {count} words".into(),
        };
        let mut args = serde_json::Map::new();
        args.insert("topic".into(), Value::String("rust".into()));
        args.insert("count".into(), Value::Number(10.into()));
        assert_eq!(msg.render(&args), "Summarize rust in 10 words");
    }

    #[test]
    fn tool_serialization_uses_camel_case() {
        let tool = Tool {
            name: "t".into(),
            service_id: "svc".into(),
            title: None,
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
            output_schema: None,
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(true),
                idempotent_hint: Some(true),
                open_world_hint: Some(true),
            }),
            cache_ttl_secs: Some(300),
            underlying_method_fqn: Some("GET /x".into()),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("\"inputSchema\""));
        assert!(json.contains("\"underlyingMethodFqn\""));
        assert!(json.contains("\"readOnlyHint\":true"));
        assert!(json.contains("\"cacheTtlSecs\":300"));
    }
}
