//! Static upstream adapter: resource-only, no tools

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::info;

use crate::config::{ResourceSource, ServiceConfig, StaticServiceConfig};
use crate::protocol::Resource;
use crate::resources::{StaticContent, StaticResource};
use crate::security::SafeDialer;
use crate::{Error, Result};

use super::{Managers, Registration, Upstream};

/// Adapter publishing statically configured resources
pub struct StaticUpstream {
    name: String,
    service_key: String,
    static_service: StaticServiceConfig,
    dialer: SafeDialer,
}

impl StaticUpstream {
    /// Create the adapter.
    pub fn new(config: ServiceConfig, dialer: SafeDialer) -> Result<Self> {
        let service_key = config.sanitized_name();
        let static_service = config.static_service.ok_or_else(|| {
            Error::Config(format!("service \"{}\" has no static config", config.name))
        })?;
        Ok(Self { name: config.name, service_key, static_service, dialer })
    }
}

#[async_trait]
impl Upstream for StaticUpstream {
    async fn register(&self, managers: &Managers, is_reload: bool) -> Result<Registration> {
        let mut resources = Vec::with_capacity(self.static_service.resources.len());
        for config in &self.static_service.resources {
            let definition = Resource {
                uri: config.uri.clone(),
                name: config.name.clone(),
                service_id: self.service_key.clone(),
                description: config.description.clone(),
                mime_type: config.mime_type.clone(),
                size: config.size,
            };
            let content = match &config.source {
                ResourceSource::Static { url: Some(url), .. } => StaticContent::Url(url.clone()),
                ResourceSource::Static { text: Some(text), .. } => {
                    StaticContent::Text(text.clone())
                }
                ResourceSource::Static { blob: Some(blob), .. } => {
                    let bytes = BASE64.decode(blob).map_err(|e| {
                        Error::Config(format!(
                            "resource \"{}\": invalid base64 blob: {e}",
                            config.uri
                        ))
                    })?;
                    StaticContent::Binary(bytes)
                }
                ResourceSource::Static { .. } => {
                    return Err(Error::Config(format!(
                        "resource \"{}\" declares no url, text or blob",
                        config.uri
                    )));
                }
                ResourceSource::Dynamic { .. } => {
                    return Err(Error::Config(format!(
                        "resource \"{}\": a static service cannot host dynamic resources",
                        config.uri
                    )));
                }
            };
            managers.resources.add_resource(Arc::new(StaticResource::new(
                definition.clone(),
                content,
                self.dialer.clone(),
            )));
            resources.push(definition);
        }

        if !is_reload {
            info!(service = %self.name, resources = resources.len(), "Static service registered");
        }

        Ok(Registration {
            service_key: self.service_key.clone(),
            tools: Vec::new(),
            resources,
        })
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceConfig, ServiceKind};
    use crate::security::DialPolicy;

    fn service(resources: Vec<ResourceConfig>) -> ServiceConfig {
        ServiceConfig {
            name: "docs".into(),
            kind: ServiceKind::Static,
            authentication: None,
            openapi: None,
            sql: None,
            s3: None,
            browser: None,
            static_service: Some(StaticServiceConfig { resources }),
        }
    }

    fn text_resource(uri: &str, text: &str) -> ResourceConfig {
        ResourceConfig {
            uri: uri.into(),
            name: uri.into(),
            description: None,
            mime_type: Some("text/plain".into()),
            size: None,
            source: ResourceSource::Static { url: None, text: Some(text.into()), blob: None },
        }
    }

    #[tokio::test]
    async fn registers_and_serves_inline_resources() {
        let upstream = StaticUpstream::new(
            service(vec![text_resource("doc://a", "alpha"), text_resource("doc://b", "beta")]),
            SafeDialer::new(DialPolicy::default()),
        )
        .unwrap();
        let managers = Managers::new();
        let registration = upstream.register(&managers, false).await.unwrap();

        assert_eq!(registration.tools.len(), 0);
        assert_eq!(registration.resources.len(), 2);
        assert_eq!(managers.resources.resource_count_for_service("docs"), 2);

        let contents = managers.resources.read("doc://a").await.unwrap();
        match &contents[0] {
            crate::protocol::ResourceContents::Text { text, .. } => assert_eq!(text, "alpha"),
            crate::protocol::ResourceContents::Blob { .. } => panic!("expected text"),
        }
    }

    #[tokio::test]
    async fn dynamic_resource_declaration_is_rejected() {
        let config = ResourceConfig {
            uri: "dyn://x".into(),
            name: "x".into(),
            description: None,
            mime_type: None,
            size: None,
            source: ResourceSource::Dynamic {
                http_call: crate::config::HttpCallRef { id: "t".into() },
            },
        };
        let upstream =
            StaticUpstream::new(service(vec![config]), SafeDialer::new(DialPolicy::default()))
                .unwrap();
        let err = upstream.register(&Managers::new(), false).await.unwrap_err();
        assert!(err.to_string().contains("cannot host dynamic resources"));
    }
}
