//! Upstream adapters
//!
//! An [`Upstream`] knows how to talk to one kind of external system and
//! translate it into tools, resources and prompts. The registry owns the
//! adapter lifecycle; the adapter owns its transport.

mod browser;
mod openapi_upstream;
mod s3;
mod sql;
mod static_service;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ServiceConfig, ServiceKind};
use crate::managers::{PromptManager, ResourceManager, ToolManager};
use crate::openapi::DocumentCache;
use crate::protocol::{Resource, Tool};
use crate::security::SafeDialer;
use crate::Result;

pub use browser::BrowserUpstream;
pub use openapi_upstream::OpenApiUpstream;
pub use s3::S3Upstream;
pub use sql::SqlUpstream;
pub use static_service::StaticUpstream;

/// The three capability managers adapters publish into.
#[derive(Clone)]
pub struct Managers {
    /// Tool registry
    pub tools: Arc<ToolManager>,
    /// Prompt registry
    pub prompts: Arc<PromptManager>,
    /// Resource registry
    pub resources: Arc<ResourceManager>,
}

impl Managers {
    /// Fresh, empty managers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tools: Arc::new(ToolManager::new()),
            prompts: Arc::new(PromptManager::new()),
            resources: Arc::new(ResourceManager::new()),
        }
    }
}

impl Default for Managers {
    fn default() -> Self {
        Self::new()
    }
}

/// What a successful registration discovered and published.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The service key capabilities were registered under
    pub service_key: String,
    /// Discovered tool descriptors
    pub tools: Vec<Tool>,
    /// Discovered resource descriptors
    pub resources: Vec<Resource>,
}

/// Optional health capability of an upstream.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe the upstream; `Ok` means healthy.
    async fn check_health(&self) -> Result<()>;
}

/// Polymorphic adapter contract.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Discover the upstream's operations and publish them into the
    /// managers. `is_reload` suppresses noise on re-registration.
    async fn register(&self, managers: &Managers, is_reload: bool) -> Result<Registration>;

    /// Tear down the adapter's transport. Published capabilities are
    /// cleared by the registry, not here.
    async fn shutdown(&self) -> Result<()>;

    /// The adapter's health capability, when it has one.
    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }
}

/// Build the adapter matching the config's kind. Construction is cheap and
/// does no I/O; discovery happens in [`Upstream::register`].
pub fn build_upstream(
    config: &ServiceConfig,
    dialer: &SafeDialer,
    spec_cache: &Arc<DocumentCache>,
) -> Result<Arc<dyn Upstream>> {
    config.validate()?;
    let upstream: Arc<dyn Upstream> = match config.kind {
        ServiceKind::Openapi => Arc::new(OpenApiUpstream::new(
            config.clone(),
            dialer.clone(),
            Arc::clone(spec_cache),
        )),
        ServiceKind::Sql => Arc::new(SqlUpstream::new(config.clone())?),
        ServiceKind::S3 => Arc::new(S3Upstream::new(config.clone())?),
        ServiceKind::Browser => Arc::new(BrowserUpstream::new(config.clone())?),
        ServiceKind::Static => Arc::new(StaticUpstream::new(config.clone(), dialer.clone())?),
    };
    Ok(upstream)
}
