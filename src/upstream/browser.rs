//! Browser upstream adapter
//!
//! Drives one browser session through a WebDriver-compatible endpoint
//! (chromedriver, geckodriver, selenium). The session is a shared resource:
//! the lifecycle lock guards starting and stopping, the page lock
//! serializes every page operation. One session is reused across calls; a
//! navigate followed by a screenshot observes the same page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{BrowserServiceConfig, ServiceConfig};
use crate::managers::{RegisteredTool, ToolHandler};
use crate::protocol::{ExecutionRequest, Tool, ToolAnnotations, ToolResult};
use crate::{Error, Result};

use super::{HealthChecker, Managers, Registration, Upstream};

const DRIVER_TIMEOUT: Duration = Duration::from_secs(60);

/// W3C WebDriver element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Adapter for a browser-automation session
pub struct BrowserUpstream {
    name: String,
    service_key: String,
    /// Held while starting or stopping the session, never during page work
    lifecycle: Mutex<()>,
    driver: Arc<PageDriver>,
}

/// Shared session state. `page` serializes every page operation and holds
/// the WebDriver session id while one is live.
struct PageDriver {
    http: reqwest::Client,
    config: BrowserServiceConfig,
    page: Mutex<Option<String>>,
}

impl BrowserUpstream {
    /// Create the adapter; the session starts in [`Upstream::register`].
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let service_key = config.sanitized_name();
        let browser = config
            .browser
            .ok_or_else(|| Error::Config(format!("service \"{}\" has no browser config", config.name)))?;
        // The driver endpoint is operator infrastructure, not caller input,
        // so it is reached directly rather than through the dial policy.
        let http = reqwest::Client::builder()
            .timeout(DRIVER_TIMEOUT)
            .build()
            .map_err(|e| Error::Browser(format!("failed to build driver client: {e}")))?;
        Ok(Self {
            name: config.name,
            service_key,
            lifecycle: Mutex::new(()),
            driver: Arc::new(PageDriver { http, config: browser, page: Mutex::new(None) }),
        })
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
                idempotent_hint: Some(false),
                open_world_hint: Some(true),
            }),
            cache_ttl_secs: None,
            underlying_method_fqn: None,
        }
    }
}

#[async_trait]
impl Upstream for BrowserUpstream {
    async fn register(&self, managers: &Managers, is_reload: bool) -> Result<Registration> {
        {
            let _lifecycle = self.lifecycle.lock().await;
            self.driver.start_session().await?;
        }

        let selector_input = |extra: Option<(&str, Value)>| {
            let mut properties = serde_json::Map::new();
            properties.insert("selector".to_string(), json!({"type": "string"}));
            let mut required = vec![json!("selector")];
            if let Some((name, schema)) = extra {
                properties.insert(name.to_string(), schema);
                required.push(json!(name));
            }
            json!({"type": "object", "properties": properties, "required": required})
        };

        let declarations: Vec<(&str, &str, Value, bool, BrowserOp)> = vec![
            (
                "navigate",
                "Navigate the page to a URL",
                json!({
                    "type": "object",
                    "properties": {"url": {"type": "string"}},
                    "required": ["url"]
                }),
                false,
                BrowserOp::Navigate,
            ),
            (
                "screenshot",
                "Capture a screenshot of the current page",
                json!({"type": "object", "properties": {}}),
                true,
                BrowserOp::Screenshot,
            ),
            (
                "content",
                "Return the current page's HTML source",
                json!({"type": "object", "properties": {}}),
                true,
                BrowserOp::Content,
            ),
            ("click", "Click the first element matching a CSS selector", selector_input(None), false, BrowserOp::Click),
            (
                "type",
                "Type text into the first element matching a CSS selector",
                selector_input(Some(("text", json!({"type": "string"})))),
                false,
                BrowserOp::Type,
            ),
            (
                "evaluate",
                "Execute a JavaScript snippet in the page",
                json!({
                    "type": "object",
                    "properties": {"script": {"type": "string"}},
                    "required": ["script"]
                }),
                false,
                BrowserOp::Evaluate,
            ),
        ];

        let mut tools = Vec::with_capacity(declarations.len());
        for (name, description, input, read_only, op) in declarations {
            let tool = self.tool(name, description, input, read_only);
            tools.push(tool.clone());
            managers.tools.add_tool(RegisteredTool::new(
                tool,
                Arc::new(BrowserToolHandler { driver: Arc::clone(&self.driver), op }),
            ));
        }

        if !is_reload {
            info!(service = %self.name, driver = %self.driver.config.webdriver_url, "Browser service registered");
        }

        Ok(Registration { service_key: self.service_key.clone(), tools, resources: Vec::new() })
    }

    async fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.driver.stop_session().await
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }
}

#[async_trait]
impl HealthChecker for BrowserUpstream {
    async fn check_health(&self) -> Result<()> {
        let url = format!("{}/status", self.driver.base());
        let response = self
            .driver
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Browser(format!("driver unreachable: {e}")))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Browser(format!("driver status unreadable: {e}")))?;
        let ready = body
            .get("value")
            .and_then(|v| v.get("ready"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if ready {
            Ok(())
        } else {
            Err(Error::Browser("driver reports not ready".to_string()))
        }
    }
}

impl PageDriver {
    fn base(&self) -> &str {
        self.config.webdriver_url.trim_end_matches('/')
    }

    fn capabilities(&self) -> Value {
        let mut always_match = serde_json::Map::new();
        always_match.insert("browserName".to_string(), json!(self.config.browser_type));
        match self.config.browser_type.as_str() {
            "firefox" => {
                let mut args = Vec::new();
                if self.config.headless {
                    args.push("-headless".to_string());
                }
                always_match.insert("moz:firefoxOptions".to_string(), json!({"args": args}));
            }
            _ => {
                let mut args = vec![format!(
                    "--window-size={},{}",
                    self.config.viewport_width, self.config.viewport_height
                )];
                if self.config.headless {
                    args.push("--headless=new".to_string());
                }
                if let Some(user_agent) = &self.config.user_agent {
                    args.push(format!("--user-agent={user_agent}"));
                }
                always_match.insert("goog:chromeOptions".to_string(), json!({"args": args}));
            }
        }
        json!({"capabilities": {"alwaysMatch": always_match}})
    }

    async fn start_session(&self) -> Result<()> {
        let mut page = self.page.lock().await;
        if page.is_some() {
            return Ok(());
        }
        let value = self
            .command(reqwest::Method::POST, &format!("{}/session", self.base()), Some(self.capabilities()))
            .await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Browser("driver returned no session id".to_string()))?
            .to_string();

        // best-effort viewport sizing; headless args already cover chrome
        let rect = json!({
            "width": self.config.viewport_width,
            "height": self.config.viewport_height,
            "x": 0, "y": 0
        });
        let rect_url = format!("{}/session/{session_id}/window/rect", self.base());
        if let Err(e) = self.command(reqwest::Method::POST, &rect_url, Some(rect)).await {
            warn!(error = %e, "Failed to size browser window");
        }

        debug!(session = %session_id, "Browser session started");
        *page = Some(session_id);
        Ok(())
    }

    async fn stop_session(&self) -> Result<()> {
        let mut page = self.page.lock().await;
        if let Some(session_id) = page.take() {
            let url = format!("{}/session/{session_id}", self.base());
            if let Err(e) = self.command(reqwest::Method::DELETE, &url, None).await {
                warn!(error = %e, "Failed to close browser session");
            }
        }
        Ok(())
    }

    /// Issue one WebDriver command and unwrap its `value` envelope.
    async fn command(&self, method: reqwest::Method, url: &str, body: Option<Value>) -> Result<Value> {
        let mut builder = self.http.request(method, url);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Browser(format!("driver request failed: {e}")))?;
        let status = response.status();
        let envelope: Value = response
            .json()
            .await
            .map_err(|e| Error::Browser(format!("driver response unreadable: {e}")))?;
        let value = envelope.get("value").cloned().unwrap_or(Value::Null);
        if !status.is_success() {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown driver error");
            return Err(Error::Browser(format!("page operation failed: {message}")));
        }
        Ok(value)
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        format!("{}/session/{session_id}/{suffix}", self.base())
    }

    async fn find_element(&self, session_id: &str, selector: &str) -> Result<String> {
        let value = self
            .command(
                reqwest::Method::POST,
                &self.session_url(session_id, "element"),
                Some(json!({"using": "css selector", "value": selector})),
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| Error::Browser(format!("no element matches \"{selector}\"")))
    }
}

#[derive(Clone, Copy)]
enum BrowserOp {
    Navigate,
    Screenshot,
    Content,
    Click,
    Type,
    Evaluate,
}

struct BrowserToolHandler {
    driver: Arc<PageDriver>,
    op: BrowserOp,
}

fn required_string(request: &ExecutionRequest, name: &str) -> Result<String> {
    request
        .arguments
        .get(name)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| Error::Browser(format!("missing required argument \"{name}\"")))
}

#[async_trait]
impl ToolHandler for BrowserToolHandler {
    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult> {
        let driver = &self.driver;
        // serialize page operations for the whole invocation
        let page = driver.page.lock().await;
        let session_id = page
            .as_ref()
            .ok_or_else(|| Error::Browser("no live browser session".to_string()))?
            .clone();

        match self.op {
            BrowserOp::Navigate => {
                let url = required_string(&request, "url")?;
                driver
                    .command(
                        reqwest::Method::POST,
                        &driver.session_url(&session_id, "url"),
                        Some(json!({"url": url})),
                    )
                    .await?;
                Ok(ToolResult::Json(json!({"url": url})))
            }
            BrowserOp::Screenshot => {
                let value = driver
                    .command(
                        reqwest::Method::GET,
                        &driver.session_url(&session_id, "screenshot"),
                        None,
                    )
                    .await?;
                let encoded = value
                    .as_str()
                    .ok_or_else(|| Error::Browser("driver returned no screenshot".to_string()))?;
                let png = BASE64
                    .decode(encoded)
                    .map_err(|e| Error::Browser(format!("invalid screenshot payload: {e}")))?;

                if let Some(dir) = &driver.config.screenshot_dir {
                    let path = format!("{dir}/shot-{}.png", Utc::now().format("%Y%m%dT%H%M%S%.3f"));
                    tokio::fs::write(&path, &png)
                        .await
                        .map_err(|e| Error::Browser(format!("failed to write \"{path}\": {e}")))?;
                    return Ok(ToolResult::Json(json!({"path": path, "bytes": png.len()})));
                }
                Ok(ToolResult::Bytes(png))
            }
            BrowserOp::Content => {
                let value = driver
                    .command(
                        reqwest::Method::GET,
                        &driver.session_url(&session_id, "source"),
                        None,
                    )
                    .await?;
                let html = value
                    .as_str()
                    .ok_or_else(|| Error::Browser("driver returned no page source".to_string()))?;
                Ok(ToolResult::Text(html.to_string()))
            }
            BrowserOp::Click => {
                let selector = required_string(&request, "selector")?;
                let element = driver.find_element(&session_id, &selector).await?;
                driver
                    .command(
                        reqwest::Method::POST,
                        &driver.session_url(&session_id, &format!("element/{element}/click")),
                        Some(json!({})),
                    )
                    .await?;
                Ok(ToolResult::Json(json!({"clicked": selector})))
            }
            BrowserOp::Type => {
                let selector = required_string(&request, "selector")?;
                let text = required_string(&request, "text")?;
                let element = driver.find_element(&session_id, &selector).await?;
                driver
                    .command(
                        reqwest::Method::POST,
                        &driver.session_url(&session_id, &format!("element/{element}/value")),
                        Some(json!({"text": text})),
                    )
                    .await?;
                Ok(ToolResult::Json(json!({"typed": selector})))
            }
            BrowserOp::Evaluate => {
                let script = required_string(&request, "script")?;
                let value = driver
                    .command(
                        reqwest::Method::POST,
                        &driver.session_url(&session_id, "execute/sync"),
                        Some(json!({"script": script, "args": []})),
                    )
                    .await?;
                Ok(ToolResult::Json(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceKind;

    fn browser_service(browser_type: &str, headless: bool) -> ServiceConfig {
        ServiceConfig {
            name: "web".into(),
            kind: ServiceKind::Browser,
            authentication: None,
            openapi: None,
            sql: None,
            s3: None,
            browser: Some(BrowserServiceConfig {
                webdriver_url: "http://127.0.0.1:9515/".into(),
                browser_type: browser_type.into(),
                headless,
                user_agent: Some("bridge-test".into()),
                viewport_width: 800,
                viewport_height: 600,
                screenshot_dir: None,
            }),
            static_service: None,
        }
    }

    #[test]
    fn chrome_capabilities_carry_headless_and_viewport() {
        let upstream = BrowserUpstream::new(browser_service("chrome", true)).unwrap();
        let caps = upstream.driver.capabilities();
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        let args: Vec<&str> = args.iter().filter_map(Value::as_str).collect();
        assert!(args.contains(&"--headless=new"));
        assert!(args.contains(&"--window-size=800,600"));
        assert!(args.contains(&"--user-agent=bridge-test"));
    }

    #[test]
    fn firefox_capabilities_use_moz_options() {
        let upstream = BrowserUpstream::new(browser_service("firefox", true)).unwrap();
        let caps = upstream.driver.capabilities();
        assert_eq!(
            caps["capabilities"]["alwaysMatch"]["moz:firefoxOptions"]["args"],
            json!(["-headless"])
        );
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let upstream = BrowserUpstream::new(browser_service("chrome", false)).unwrap();
        assert_eq!(upstream.driver.base(), "http://127.0.0.1:9515");
    }

    #[tokio::test]
    async fn operations_without_a_session_fail() {
        let upstream = BrowserUpstream::new(browser_service("chrome", true)).unwrap();
        let handler =
            BrowserToolHandler { driver: Arc::clone(&upstream.driver), op: BrowserOp::Content };
        let err = handler.execute(ExecutionRequest::empty()).await.unwrap_err();
        assert!(err.to_string().contains("no live browser session"));
    }
}
