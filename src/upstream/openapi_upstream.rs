//! OpenAPI upstream adapter
//!
//! Discovers operations from the service's OpenAPI document and publishes
//! one tool per operation (or per explicit declaration), plus any declared
//! prompts and resources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::config::{
    ApiKeyAuthConfig, OpenApiServiceConfig, OpenApiToolConfig, ResourceConfig, ResourceSource,
    ServiceConfig,
};
use crate::managers::{RegisteredTool, ToolHandler, ToolManager};
use crate::openapi::{
    DocumentCache, ParameterLocation, ToolDescriptor, acquire_spec, convert_operation,
};
use crate::protocol::{
    ExecutionRequest, Prompt, Resource, Tool, ToolAnnotations, ToolResult,
};
use crate::resources::{DynamicResource, StaticContent, StaticResource};
use crate::security::SafeDialer;
use crate::{Error, Result};

use super::{Managers, Registration, Upstream};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Adapter for an OpenAPI-described HTTP API
pub struct OpenApiUpstream {
    name: String,
    service_key: String,
    openapi: OpenApiServiceConfig,
    api_key: Option<ApiKeyAuthConfig>,
    dialer: SafeDialer,
    spec_cache: Arc<DocumentCache>,
    /// Per-service HTTP client, built against the vetted base address
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl OpenApiUpstream {
    /// Create the adapter; no I/O happens until [`Upstream::register`].
    #[must_use]
    pub fn new(config: ServiceConfig, dialer: SafeDialer, spec_cache: Arc<DocumentCache>) -> Self {
        let service_key = config.sanitized_name();
        let api_key = config.authentication.as_ref().and_then(|a| a.api_key.clone());
        Self {
            name: config.name,
            service_key,
            openapi: config.openapi.unwrap_or_default(),
            api_key,
            dialer,
            spec_cache,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn base_url(&self, from_doc: Option<&str>) -> Result<String> {
        let address = from_doc
            .map(ToString::to_string)
            .or_else(|| self.openapi.address.clone())
            .ok_or_else(|| {
                Error::Config(format!(
                    "service \"{}\" declares neither servers nor an address",
                    self.name
                ))
            })?;
        let parsed = url::Url::parse(&address)
            .map_err(|e| Error::Config(format!("invalid address \"{address}\": {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(address.trim_end_matches('/').to_string()),
            other => Err(Error::Config(format!(
                "address scheme must be http or https, got \"{other}\""
            ))),
        }
    }

    /// Descriptors for explicitly declared tools.
    fn declared_descriptors(&self) -> Vec<ToolDescriptor> {
        self.openapi.tools.iter().map(|decl| declared_descriptor(decl, &self.service_key)).collect()
    }

    fn publish_resources(
        &self,
        configs: &[ResourceConfig],
        tools: &Arc<ToolManager>,
        managers: &Managers,
    ) -> Result<Vec<Resource>> {
        let mut published = Vec::new();
        for config in configs {
            let definition = Resource {
                uri: config.uri.clone(),
                name: config.name.clone(),
                service_id: self.service_key.clone(),
                description: config.description.clone(),
                mime_type: config.mime_type.clone(),
                size: config.size,
            };
            match &config.source {
                ResourceSource::Static { url, text, blob } => {
                    let content = static_content(url, text, blob, &config.uri)?;
                    managers.resources.add_resource(Arc::new(StaticResource::new(
                        definition.clone(),
                        content,
                        self.dialer.clone(),
                    )));
                }
                ResourceSource::Dynamic { http_call } => {
                    if tools.get_tool(&http_call.id).is_none() {
                        return Err(Error::Config(format!(
                            "resource \"{}\" refers to unknown tool \"{}\"",
                            config.uri, http_call.id
                        )));
                    }
                    managers.resources.add_resource(Arc::new(DynamicResource::new(
                        definition.clone(),
                        http_call.id.clone(),
                        Arc::clone(tools),
                    )));
                }
            }
            published.push(definition);
        }
        Ok(published)
    }
}

fn static_content(
    url: &Option<String>,
    text: &Option<String>,
    blob: &Option<String>,
    uri: &str,
) -> Result<StaticContent> {
    if let Some(url) = url {
        return Ok(StaticContent::Url(url.clone()));
    }
    if let Some(text) = text {
        return Ok(StaticContent::Text(text.clone()));
    }
    if let Some(blob) = blob {
        let bytes = BASE64
            .decode(blob)
            .map_err(|e| Error::Config(format!("resource \"{uri}\": invalid base64 blob: {e}")))?;
        return Ok(StaticContent::Binary(bytes));
    }
    Err(Error::Config(format!("resource \"{uri}\" declares no url, text or blob")))
}

fn declared_descriptor(decl: &OpenApiToolConfig, service_key: &str) -> ToolDescriptor {
    let method = decl.method.to_uppercase();
    // {param} placeholders in the path become required string inputs
    let mut properties = Map::new();
    let mut required = Vec::new();
    let mut locations = HashMap::new();
    for param in path_template_params(&decl.path) {
        properties.insert(param.clone(), json!({"type": "string"}));
        locations.insert(param.clone(), ParameterLocation::Path);
        required.push(Value::String(param));
    }
    let mut input_schema = Map::new();
    input_schema.insert("type".to_string(), json!("object"));
    input_schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        input_schema.insert("required".to_string(), Value::Array(required));
    }

    let idempotent = matches!(method.as_str(), "GET" | "HEAD" | "OPTIONS" | "TRACE" | "PUT" | "DELETE");
    ToolDescriptor {
        tool: Tool {
            name: decl.name.clone(),
            service_id: service_key.to_string(),
            title: Some(decl.name.clone()),
            description: decl.description.clone(),
            input_schema: Value::Object(input_schema),
            output_schema: None,
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(method == "GET"),
                idempotent_hint: Some(idempotent),
                open_world_hint: Some(true),
            }),
            cache_ttl_secs: decl.cache_ttl_secs,
            underlying_method_fqn: Some(format!("{method} {}", decl.path)),
        },
        parameter_locations: locations,
        wrapped_body: false,
    }
}

fn path_template_params(path: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else { break };
        params.push(rest[start + 1..start + end].to_string());
        rest = &rest[start + end + 1..];
    }
    params
}

#[async_trait]
impl Upstream for OpenApiUpstream {
    async fn register(&self, managers: &Managers, is_reload: bool) -> Result<Registration> {
        let content = acquire_spec(&self.openapi, &self.dialer).await?;
        let parsed = self.spec_cache.get_or_parse(&content)?;
        let (operations, doc) = parsed.as_ref();

        if doc.servers.len() > 1 {
            debug!(service = %self.name, ignored = doc.servers.len() - 1, "Using first declared server");
        }
        let base_url = self.base_url(doc.base_url())?;

        let base = url::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid base URL \"{base_url}\": {e}")))?;
        let client = self.dialer.http_client(&base, UPSTREAM_TIMEOUT).await?;
        self.clients.lock().insert(self.service_key.clone(), client.clone());

        let descriptors: Vec<ToolDescriptor> = if self.openapi.tools.is_empty() {
            if self.openapi.auto_discover_tool {
                let mut converted = Vec::with_capacity(operations.len());
                for op in operations {
                    converted.push(convert_operation(op, doc, &self.service_key)?);
                }
                converted
            } else {
                Vec::new()
            }
        } else {
            self.declared_descriptors()
        };

        let mut tools = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let handler = OpenApiToolHandler::from_descriptor(
                &descriptor,
                client.clone(),
                base_url.clone(),
                self.api_key.clone(),
            )?;
            tools.push(descriptor.tool.clone());
            managers
                .tools
                .add_tool(RegisteredTool::new(descriptor.tool, Arc::new(handler)));
        }

        for prompt in &self.openapi.prompts {
            managers.prompts.add_prompt(Prompt {
                name: prompt.name.clone(),
                service_id: self.service_key.clone(),
                description: prompt.description.clone(),
                arguments: prompt.arguments.clone(),
                messages: prompt.messages.clone(),
            });
        }

        let resources =
            self.publish_resources(&self.openapi.resources, &managers.tools, managers)?;

        if !is_reload {
            info!(
                service = %self.name,
                tools = tools.len(),
                prompts = self.openapi.prompts.len(),
                resources = resources.len(),
                "OpenAPI service registered"
            );
        }

        Ok(Registration { service_key: self.service_key.clone(), tools, resources })
    }

    async fn shutdown(&self) -> Result<()> {
        self.clients.lock().remove(&self.service_key);
        Ok(())
    }
}

/// Handler binding one HTTP operation: method and path are reconstructed
/// from the tool's fqn by splitting once at the first space.
struct OpenApiToolHandler {
    client: reqwest::Client,
    base_url: String,
    method: reqwest::Method,
    path: String,
    locations: HashMap<String, ParameterLocation>,
    wrapped_body: bool,
    api_key: Option<ApiKeyAuthConfig>,
    tool_name: String,
}

impl OpenApiToolHandler {
    fn from_descriptor(
        descriptor: &ToolDescriptor,
        client: reqwest::Client,
        base_url: String,
        api_key: Option<ApiKeyAuthConfig>,
    ) -> Result<Self> {
        let (method, path) = descriptor.tool.method_and_path().ok_or_else(|| {
            Error::OpenApi(format!(
                "tool \"{}\" carries no upstream method",
                descriptor.tool.name
            ))
        })?;
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::OpenApi(format!("invalid HTTP method \"{method}\"")))?;
        Ok(Self {
            client,
            base_url,
            method,
            path: path.to_string(),
            locations: descriptor.parameter_locations.clone(),
            wrapped_body: descriptor.wrapped_body,
            api_key,
            tool_name: descriptor.tool.name.clone(),
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let name: HeaderName = api_key
                .header
                .as_deref()
                .unwrap_or("Authorization")
                .parse()
                .map_err(|_| Error::Config("invalid api_key header name".to_string()))?;
            // never echo the credential into an error message
            let value: HeaderValue = api_key
                .value
                .parse()
                .map_err(|_| Error::Config("invalid api_key value".to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ToolHandler for OpenApiToolHandler {
    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult> {
        let mut path = self.path.clone();
        let mut query: Vec<(String, String)> = Vec::new();
        let mut headers = self.auth_headers()?;
        let mut body = Map::new();
        let mut wrapped_body: Option<Value> = None;

        let query_fallback =
            self.method == reqwest::Method::GET || self.method == reqwest::Method::HEAD;

        for (key, value) in &request.arguments {
            match self.locations.get(key) {
                Some(ParameterLocation::Path) => {
                    path = path.replace(&format!("{{{key}}}"), &scalar_string(value));
                }
                Some(ParameterLocation::Query) => {
                    query.push((key.clone(), scalar_string(value)));
                }
                Some(ParameterLocation::Header) => {
                    let name: HeaderName = key
                        .parse()
                        .map_err(|_| Error::Tool(format!("invalid header name \"{key}\"")))?;
                    let header_value: HeaderValue = scalar_string(value)
                        .parse()
                        .map_err(|_| Error::Tool(format!("invalid value for header \"{key}\"")))?;
                    headers.insert(name, header_value);
                }
                Some(ParameterLocation::Cookie) => {
                    // cookies are excluded from generated schemas; ignore
                }
                None => {
                    if self.wrapped_body && key == "request_body" {
                        wrapped_body = Some(value.clone());
                    } else if query_fallback {
                        query.push((key.clone(), scalar_string(value)));
                    } else {
                        body.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let url = format!("{}{}", self.base_url, path);
        debug!(tool = %self.tool_name, method = %self.method, url = %url, "Invoking upstream");

        let mut builder = self.client.request(self.method.clone(), &url).headers(headers);
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(value) = wrapped_body {
            builder = builder.json(&value);
        } else if !body.is_empty() {
            builder = builder.json(&Value::Object(body));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Tool(format!("\"{}\": request failed: {e}", self.tool_name)))?;

        let status = response.status();
        if !status.is_success() {
            let snippet: String = response.text().await.unwrap_or_default();
            warn!(tool = %self.tool_name, status = %status, "Upstream returned an error");
            return Err(Error::Tool(format!(
                "\"{}\": upstream returned status {status}: {}",
                self.tool_name,
                snippet.chars().take(200).collect::<String>()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?;

        if content_type.contains("json") {
            return Ok(ToolResult::Json(serde_json::from_slice(&bytes)?));
        }
        if content_type.starts_with("text/") || content_type.is_empty() {
            if let Ok(text) = String::from_utf8(bytes.to_vec()) {
                return Ok(ToolResult::Text(text));
            }
        }
        Ok(ToolResult::Bytes(bytes.to_vec()))
    }
}
