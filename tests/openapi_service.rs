//! OpenAPI service end-to-end tests against a local HTTP upstream

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use mcp_bridge::config::{OpenApiServiceConfig, ServiceConfig, ServiceKind};
use mcp_bridge::protocol::{ExecutionRequest, ToolResult};
use mcp_bridge::registry::ServiceRegistry;
use mcp_bridge::security::{DialPolicy, SafeDialer};
use mcp_bridge::upstream::Managers;

fn spec_for(port: u16) -> String {
    format!(
        r#"
openapi: "3.0.0"
info:
  title: Pets
  version: "1.0"
servers:
  - url: http://127.0.0.1:{port}
paths:
  /pets:
    get:
      operationId: listPets
      summary: List pets
      parameters:
        - name: limit
          in: query
          schema:
            type: integer
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema:
                type: array
                items:
                  type: object
"#
    )
}

fn openapi_service(name: &str, spec: String) -> ServiceConfig {
    ServiceConfig {
        name: name.into(),
        kind: ServiceKind::Openapi,
        authentication: None,
        openapi: Some(OpenApiServiceConfig {
            address: None,
            spec_content: Some(spec),
            spec_url: None,
            auto_discover_tool: true,
            tools: vec![],
            prompts: vec![],
            resources: vec![],
        }),
        sql: None,
        s3: None,
        browser: None,
        static_service: None,
    }
}

fn loopback_registry() -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::new(
        Managers::new(),
        SafeDialer::new(DialPolicy { allow_loopback: true, allow_private: false }),
    ))
}

/// Serve canned HTTP responses on 127.0.0.1, capturing request lines.
async fn serve(responses: Vec<&'static str>) -> (u16, Arc<parking_lot::Mutex<Vec<String>>>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen_writer = Arc::clone(&seen);
    tokio::spawn(async move {
        for response in responses {
            let Ok((mut socket, _)) = listener.accept().await else { return };
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            seen_writer
                .lock()
                .push(request.lines().next().unwrap_or_default().to_string());
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    (port, seen)
}

#[tokio::test]
async fn discovered_tool_invokes_upstream() {
    let (port, seen) = serve(vec![
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 24\r\nConnection: close\r\n\r\n[{\"name\":\"cat\"},{\"a\":1}]",
    ])
    .await;

    let registry = loopback_registry();
    let registration =
        registry.register(openapi_service("pets", spec_for(port))).await.unwrap();

    assert_eq!(registration.tools.len(), 1);
    let tool = &registration.tools[0];
    assert_eq!(tool.name, "listPets");
    assert_eq!(tool.underlying_method_fqn.as_deref(), Some("GET /pets"));

    let mut args = serde_json::Map::new();
    args.insert("limit".into(), serde_json::json!(5));
    let result = registry
        .managers()
        .tools
        .execute("listPets", ExecutionRequest { arguments: args })
        .await
        .unwrap();

    assert_eq!(
        result,
        ToolResult::Json(serde_json::json!([{"name": "cat"}, {"a": 1}]))
    );
    let request_line = seen.lock()[0].clone();
    assert!(request_line.starts_with("GET /pets?limit=5"), "{request_line}");
}

#[tokio::test]
async fn invalid_spec_fails_registration_but_keeps_the_entry() {
    let registry = loopback_registry();
    let err = registry
        .register(openapi_service("broken", "openapi: \"2.0\"\ninfo: {title: x, version: '1'}\npaths: {}".into()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("openapi:"));

    // discovery failure keeps the config entry with its error recorded
    let (message, failing) = registry.get_service_error("broken");
    assert!(failing);
    assert!(message.contains("unsupported OpenAPI version"));
    assert!(registry.get_service_config("broken").is_ok());
    assert_eq!(registry.managers().tools.len(), 0);
}

#[tokio::test]
async fn rejected_scheme_fails_registration() {
    let spec = r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
servers:
  - url: ftp://files.example.com
paths: {}
"#;
    let registry = loopback_registry();
    let err = registry.register(openapi_service("ftp", spec.to_string())).await.unwrap_err();
    assert!(err.to_string().contains("scheme must be http or https"));
}

#[tokio::test]
async fn upstream_error_status_surfaces_to_caller() {
    let (port, _seen) = serve(vec![
        "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\ndown",
    ])
    .await;

    let registry = loopback_registry();
    registry.register(openapi_service("pets", spec_for(port))).await.unwrap();

    let err = registry
        .managers()
        .tools
        .execute("listPets", ExecutionRequest::empty())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));
}
