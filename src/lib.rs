//! MCP Bridge Library
//!
//! Service-integration router: dynamically ingests heterogeneous upstream
//! services — OpenAPI-described HTTP APIs, SQL databases, object stores,
//! browser-automation sessions, and statically configured endpoints — and
//! re-exposes their operations as tools, resources and prompts.
//!
//! # Architecture
//!
//! - [`registry::ServiceRegistry`] owns the service map and lifecycle
//! - [`upstream`] adapters translate one upstream kind into capabilities
//! - [`managers`] hold the published tools, resources and prompts
//! - [`openapi`] translates OpenAPI 3 documents into tool descriptors
//! - [`security::SafeDialer`] gates every outbound connection

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod managers;
pub mod openapi;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod secrets;
pub mod security;
pub mod updater;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
