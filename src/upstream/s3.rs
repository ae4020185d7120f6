//! Object-store upstream adapter
//!
//! Exposes five tools over one bucket: `list_objects`, `get_object`,
//! `put_object`, `delete_object` and `get_object_metadata`. Every key must
//! live under the configured prefix; writes are rejected on read-only
//! services; reads cap the returned body at 4 MiB and flag truncation.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::{S3ServiceConfig, ServiceConfig};
use crate::managers::{RegisteredTool, ToolHandler};
use crate::protocol::{ExecutionRequest, Tool, ToolAnnotations, ToolResult};
use crate::{Error, Result};

use super::{HealthChecker, Managers, Registration, Upstream};

/// Returned object bodies are capped at 4 MiB.
const READ_CAP: usize = 4 * 1024 * 1024;

/// Adapter for an S3-compatible object store
pub struct S3Upstream {
    name: String,
    service_key: String,
    s3: S3ServiceConfig,
    session: Mutex<Option<Arc<Session>>>,
}

/// Shared state handlers operate on.
struct Session {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    read_only: bool,
}

impl Session {
    fn guard_key(&self, key: &str) -> Result<()> {
        if key.starts_with(&self.prefix) {
            Ok(())
        } else {
            Err(Error::ObjectStore(format!(
                "access denied: key \"{key}\" is outside the configured prefix"
            )))
        }
    }

    fn guard_write(&self, operation: &str) -> Result<()> {
        if self.read_only {
            Err(Error::ObjectStore(format!(
                "{operation} rejected: service is read-only"
            )))
        } else {
            Ok(())
        }
    }
}

impl S3Upstream {
    /// Create the adapter; the client is built in [`Upstream::register`].
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let service_key = config.sanitized_name();
        let s3 = config
            .s3
            .ok_or_else(|| Error::Config(format!("service \"{}\" has no s3 config", config.name)))?;
        if s3.bucket.is_empty() {
            return Err(Error::Config(format!("service \"{}\" declares no bucket", config.name)));
        }
        Ok(Self { name: config.name, service_key, s3, session: Mutex::new(None) })
    }

    async fn build_client(&self) -> Result<aws_sdk_s3::Client> {
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.s3.region.clone()));
        if let Some(endpoint) = &self.s3.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        match (&self.s3.access_key, &self.s3.secret) {
            (Some(access_key), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret.clone(),
                    None,
                    None,
                    "service-config",
                ));
            }
            (None, None) => {
                // fall back to the ambient chain (env, profile, IMDS)
                let shared = aws_config::load_defaults(BehaviorVersion::latest()).await;
                if let Some(provider) = shared.credentials_provider() {
                    builder = builder.credentials_provider(provider);
                }
            }
            _ => {
                return Err(Error::Config(format!(
                    "service \"{}\" declares only one of access_key and secret",
                    self.name
                )));
            }
        }
        Ok(aws_sdk_s3::Client::from_conf(builder.build()))
    }

    fn tool(&self, name: &str, description: &str, input: Value, read_only: bool) -> Tool {
        Tool {
            name: name.to_string(),
            service_id: self.service_key.clone(),
            title: Some(name.to_string()),
            description: Some(description.to_string()),
            input_schema: input,
            output_schema: None,
            annotations: Some(ToolAnnotations {
                read_only_hint: Some(read_only),
                idempotent_hint: Some(read_only),
                open_world_hint: Some(true),
            }),
            cache_ttl_secs: None,
            underlying_method_fqn: None,
        }
    }
}

#[async_trait]
impl Upstream for S3Upstream {
    async fn register(&self, managers: &Managers, is_reload: bool) -> Result<Registration> {
        let session = Arc::new(Session {
            client: self.build_client().await?,
            bucket: self.s3.bucket.clone(),
            prefix: self.s3.prefix.clone(),
            read_only: self.s3.read_only,
        });
        *self.session.lock() = Some(Arc::clone(&session));

        let key_input = json!({
            "type": "object",
            "properties": {"key": {"type": "string"}},
            "required": ["key"]
        });

        let declarations = [
            (
                "list_objects",
                "List object keys under a prefix",
                json!({
                    "type": "object",
                    "properties": {
                        "prefix": {"type": "string"},
                        "max_keys": {"type": "integer"}
                    }
                }),
                true,
                Op::List,
            ),
            ("get_object", "Fetch an object's contents", key_input.clone(), true, Op::Get),
            (
                "put_object",
                "Write an object",
                json!({
                    "type": "object",
                    "properties": {
                        "key": {"type": "string"},
                        "content": {"type": "string"},
                        "content_base64": {"type": "string"}
                    },
                    "required": ["key"]
                }),
                false,
                Op::Put,
            ),
            ("delete_object", "Delete an object", key_input.clone(), false, Op::Delete),
            ("get_object_metadata", "Fetch object metadata", key_input, true, Op::Head),
        ];

        let mut tools = Vec::with_capacity(declarations.len());
        for (name, description, input, read_only, op) in declarations {
            let tool = self.tool(name, description, input, read_only);
            tools.push(tool.clone());
            managers.tools.add_tool(RegisteredTool::new(
                tool,
                Arc::new(S3ToolHandler { session: Arc::clone(&session), op }),
            ));
        }

        if !is_reload {
            info!(service = %self.name, bucket = %self.s3.bucket, "S3 service registered");
        }

        Ok(Registration { service_key: self.service_key.clone(), tools, resources: Vec::new() })
    }

    async fn shutdown(&self) -> Result<()> {
        self.session.lock().take();
        Ok(())
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }
}

#[async_trait]
impl HealthChecker for S3Upstream {
    async fn check_health(&self) -> Result<()> {
        let session = self
            .session
            .lock()
            .clone()
            .ok_or_else(|| Error::ObjectStore(format!("service \"{}\" has no client", self.name)))?;
        session
            .client
            .head_bucket()
            .bucket(&session.bucket)
            .send()
            .await
            .map_err(|e| Error::ObjectStore(format!("bucket probe failed: {e}")))?;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Op {
    List,
    Get,
    Put,
    Delete,
    Head,
}

struct S3ToolHandler {
    session: Arc<Session>,
    op: Op,
}

fn string_arg(request: &ExecutionRequest, name: &str) -> Option<String> {
    request.arguments.get(name).and_then(Value::as_str).map(ToString::to_string)
}

fn required_key(request: &ExecutionRequest) -> Result<String> {
    string_arg(request, "key")
        .ok_or_else(|| Error::ObjectStore("missing required argument \"key\"".to_string()))
}

#[async_trait]
impl ToolHandler for S3ToolHandler {
    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult> {
        let session = &self.session;
        match self.op {
            Op::List => {
                let prefix = match string_arg(&request, "prefix") {
                    Some(prefix) => {
                        session.guard_key(&prefix)?;
                        prefix
                    }
                    None => session.prefix.clone(),
                };
                let max_keys = request
                    .arguments
                    .get("max_keys")
                    .and_then(Value::as_i64)
                    .and_then(|n| i32::try_from(n).ok())
                    .unwrap_or(1000);
                let output = session
                    .client
                    .list_objects_v2()
                    .bucket(&session.bucket)
                    .prefix(&prefix)
                    .max_keys(max_keys)
                    .send()
                    .await
                    .map_err(|e| Error::ObjectStore(format!("list_objects failed: {e}")))?;
                let objects: Vec<Value> = output
                    .contents()
                    .iter()
                    .map(|object| {
                        json!({
                            "key": object.key(),
                            "size": object.size(),
                            "last_modified": object.last_modified().map(|t| t.secs()),
                        })
                    })
                    .collect();
                debug!(count = objects.len(), "Listed objects");
                Ok(ToolResult::Json(json!({
                    "objects": objects,
                    "is_truncated": output.is_truncated().unwrap_or(false),
                })))
            }
            Op::Get => {
                let key = required_key(&request)?;
                session.guard_key(&key)?;
                let output = session
                    .client
                    .get_object()
                    .bucket(&session.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| Error::ObjectStore(format!("get_object \"{key}\" failed: {e}")))?;
                let content_type = output.content_type().map(ToString::to_string);
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| Error::ObjectStore(format!("failed to read \"{key}\": {e}")))?
                    .into_bytes();

                let truncated = bytes.len() > READ_CAP;
                let body = &bytes[..bytes.len().min(READ_CAP)];
                let (content, encoding) = match std::str::from_utf8(body) {
                    Ok(text) => (text.to_string(), "utf-8"),
                    Err(_) => (BASE64.encode(body), "base64"),
                };
                Ok(ToolResult::Json(json!({
                    "key": key,
                    "size": bytes.len(),
                    "content_type": content_type,
                    "content": content,
                    "encoding": encoding,
                    "truncated": truncated,
                })))
            }
            Op::Put => {
                let key = required_key(&request)?;
                session.guard_key(&key)?;
                session.guard_write("put_object")?;
                let body = if let Some(b64) = string_arg(&request, "content_base64") {
                    BASE64
                        .decode(b64)
                        .map_err(|e| Error::ObjectStore(format!("invalid content_base64: {e}")))?
                } else {
                    string_arg(&request, "content").unwrap_or_default().into_bytes()
                };
                let size = body.len();
                let output = session
                    .client
                    .put_object()
                    .bucket(&session.bucket)
                    .key(&key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| Error::ObjectStore(format!("put_object \"{key}\" failed: {e}")))?;
                Ok(ToolResult::Json(json!({
                    "key": key,
                    "size": size,
                    "etag": output.e_tag(),
                })))
            }
            Op::Delete => {
                let key = required_key(&request)?;
                session.guard_key(&key)?;
                session.guard_write("delete_object")?;
                session
                    .client
                    .delete_object()
                    .bucket(&session.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| Error::ObjectStore(format!("delete_object \"{key}\" failed: {e}")))?;
                Ok(ToolResult::Json(json!({"key": key, "deleted": true})))
            }
            Op::Head => {
                let key = required_key(&request)?;
                session.guard_key(&key)?;
                let output = session
                    .client
                    .head_object()
                    .bucket(&session.bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|e| {
                        Error::ObjectStore(format!("get_object_metadata \"{key}\" failed: {e}"))
                    })?;
                Ok(ToolResult::Json(json!({
                    "key": key,
                    "size": output.content_length(),
                    "content_type": output.content_type(),
                    "etag": output.e_tag(),
                    "last_modified": output.last_modified().map(|t| t.secs()),
                })))
            }
        }
    }
}
