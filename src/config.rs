//! Service and bridge configuration

use std::collections::HashMap;
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::protocol::{PromptArgument, PromptMessage};
use crate::{Error, Result};

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Environment files loaded into the process environment before services
    /// are registered. Files that don't exist are silently skipped.
    pub env_files: Vec<String>,
    /// Seconds between periodic health checks
    pub health_check_interval_secs: Option<u64>,
    /// Services to register at startup
    pub services: Vec<ServiceConfig>,
}

impl BridgeConfig {
    /// Load configuration from an optional YAML file plus `MCP_BRIDGE_`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!("config file not found: {}", p.display())));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("MCP_BRIDGE_").split("__"));

        let config: Self = figment.extract().map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    fn load_env_files(&self) {
        for path in &self.env_files {
            match dotenvy::from_path(path) {
                Ok(()) => tracing::debug!(file = %path, "Loaded environment file"),
                Err(dotenvy::Error::Io(_)) => {}
                Err(e) => tracing::warn!(file = %path, error = %e, "Failed to parse environment file"),
            }
        }
    }
}

/// Upstream kind selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// OpenAPI-described HTTP API
    Openapi,
    /// SQL database
    Sql,
    /// S3-compatible object store
    S3,
    /// Browser-automation session
    Browser,
    /// Statically configured resources
    Static,
}

impl ServiceKind {
    /// Lowercase identifier used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openapi => "openapi",
            Self::Sql => "sql",
            Self::S3 => "s3",
            Self::Browser => "browser",
            Self::Static => "static",
        }
    }
}

/// One upstream service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Human-visible service name; feeds the sanitized key and the id digest
    pub name: String,
    /// Adapter selector
    pub kind: ServiceKind,
    /// Caller-facing authenticators installed on successful registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationConfig>,
    /// OpenAPI adapter parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openapi: Option<OpenApiServiceConfig>,
    /// SQL adapter parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlServiceConfig>,
    /// Object-store adapter parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3ServiceConfig>,
    /// Browser adapter parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserServiceConfig>,
    /// Static resource parameters
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_service: Option<StaticServiceConfig>,
}

impl ServiceConfig {
    /// Sanitized primary key for this service.
    #[must_use]
    pub fn sanitized_name(&self) -> String {
        sanitize_service_name(&self.name)
    }

    /// Deterministic id: hex SHA-256 of the raw name.
    #[must_use]
    pub fn id(&self) -> String {
        service_fingerprint(&self.name)
    }

    /// Check that the variant config matching `kind` is present.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("service name must not be empty".to_string()));
        }
        let present = match self.kind {
            ServiceKind::Openapi => self.openapi.is_some(),
            ServiceKind::Sql => self.sql.is_some(),
            ServiceKind::S3 => self.s3.is_some(),
            ServiceKind::Browser => self.browser.is_some(),
            ServiceKind::Static => self.static_service.is_some(),
        };
        if present {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "service \"{}\" is missing its {} config",
                self.name,
                self.kind.as_str()
            )))
        }
    }
}

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
#[must_use]
pub fn sanitize_service_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Hex SHA-256 of the raw service name.
#[must_use]
pub fn service_fingerprint(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

/// Caller-facing authenticator declarations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    /// API-key authenticator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKeyAuthConfig>,
    /// OAuth2 authenticator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Config>,
}

/// API-key authenticator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyAuthConfig {
    /// Header carrying the key (default `Authorization`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// The key value; never returned by any read path
    pub value: String,
}

/// OAuth2 authenticator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// Token issuer URL
    pub issuer_url: String,
    /// Expected audience
    pub audience: String,
    /// Optional client secret; never returned by any read path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// OpenAPI adapter parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenApiServiceConfig {
    /// Base address used when the document declares no `servers`.
    /// Scheme must be `http` or `https`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Inline OpenAPI document (YAML or JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_content: Option<String>,
    /// URL to fetch the OpenAPI document from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_url: Option<String>,
    /// Generate a tool for every discovered operation (default true)
    #[serde(default = "default_true")]
    pub auto_discover_tool: bool,
    /// Explicit tool declarations; when non-empty these override discovery
    pub tools: Vec<OpenApiToolConfig>,
    /// Prompt templates registered with the prompt manager
    pub prompts: Vec<PromptConfig>,
    /// Resources registered with the resource manager
    pub resources: Vec<ResourceConfig>,
}

fn default_true() -> bool {
    true
}

/// Explicit OpenAPI tool declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenApiToolConfig {
    /// Tool name; for dynamic resources this is the `http_call.id`
    pub name: String,
    /// Tool description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// HTTP method
    pub method: String,
    /// Request path, `{param}` placeholders allowed
    pub path: String,
    /// Response cache TTL in seconds, carried onto the generated tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

/// Prompt template declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Prompt name
    pub name: String,
    /// Prompt description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Accepted arguments
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
    /// Templated messages
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// Resource declaration (static or dynamic)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource URI
    pub uri: String,
    /// Resource name
    pub name: String,
    /// Resource description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Declared size; for URL-backed resources a positive size becomes the
    /// read ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Where the contents come from
    #[serde(flatten)]
    pub source: ResourceSource,
}

/// Resource content source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceSource {
    /// Inline or URL-fetched contents
    Static {
        /// URL to GET on read
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// Inline text contents
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Inline binary contents, base64-encoded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blob: Option<String>,
    },
    /// Contents produced by a tool invocation
    Dynamic {
        /// Reference to the backing tool
        http_call: HttpCallRef,
    },
}

/// Reference from a dynamic resource to its backing tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCallRef {
    /// Name of the declared tool to invoke on read
    pub id: String,
}

/// SQL adapter parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlServiceConfig {
    /// Driver name (`sqlite`, `postgres`, `mysql`); informational, the DSN
    /// scheme selects the driver
    pub driver: String,
    /// Connection string
    pub dsn: String,
    /// One tool per call definition
    pub calls: HashMap<String, SqlCallConfig>,
    /// Deny rules compiled at registration, applied at execute time
    pub input_policy: Vec<SqlPolicyRule>,
}

/// One parameterized SQL call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlCallConfig {
    /// Parameterized query text
    pub query: String,
    /// Argument names bound positionally; missing arguments bind NULL
    #[serde(default)]
    pub parameter_order: Vec<String>,
    /// Response cache TTL in seconds, carried onto the generated tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

/// Deny rule over tool name and/or serialized input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlPolicyRule {
    /// Regex matched against the tool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Regex matched against the JSON-serialized input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

/// Object-store adapter parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3ServiceConfig {
    /// Bucket name
    pub bucket: String,
    /// Region
    pub region: String,
    /// Custom endpoint (MinIO, localstack, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Static access key id; never returned by any read path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    /// Static secret access key; never returned by any read path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Every object key must begin with this prefix
    pub prefix: String,
    /// Reject writes when set
    pub read_only: bool,
}

/// Browser adapter parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserServiceConfig {
    /// WebDriver endpoint (chromedriver, geckodriver, selenium)
    pub webdriver_url: String,
    /// Browser name requested in session capabilities
    pub browser_type: String,
    /// Run without a visible window
    pub headless: bool,
    /// Override the user agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
    /// Directory screenshots are written to; when unset screenshots are
    /// returned inline only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<String>,
}

impl Default for BrowserServiceConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            browser_type: "chrome".to_string(),
            headless: true,
            user_agent: None,
            viewport_width: 1280,
            viewport_height: 720,
            screenshot_dir: None,
        }
    }
}

/// Static adapter parameters (resource-only)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticServiceConfig {
    /// Resources registered with the resource manager
    pub resources: Vec<ResourceConfig>,
}
