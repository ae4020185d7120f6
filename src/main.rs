//! MCP Bridge - service-integration router
//!
//! Registers the configured upstream services, runs the health scheduler,
//! and tears everything down on SIGINT.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mcp_bridge::cli::Cli;
use mcp_bridge::config::BridgeConfig;
use mcp_bridge::registry::{HealthScheduler, ServiceRegistry};
use mcp_bridge::security::SafeDialer;
use mcp_bridge::setup_tracing;
use mcp_bridge::upstream::Managers;

const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match BridgeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let registry = Arc::new(ServiceRegistry::new(Managers::new(), SafeDialer::from_env()));

    let mut registered: Vec<String> = Vec::new();
    for service in &config.services {
        let name = service.name.clone();
        match registry.register(service.clone()).await {
            Ok(registration) => {
                info!(
                    service = %name,
                    tools = registration.tools.len(),
                    resources = registration.resources.len(),
                    "Registered"
                );
                registered.push(name);
            }
            Err(e) => {
                // the config entry stays visible with its error recorded;
                // the operator can fix and re-register
                warn!(service = %name, error = %e, "Registration failed");
            }
        }
    }

    let interval = cli
        .health_interval
        .or(config.health_check_interval_secs)
        .unwrap_or(DEFAULT_HEALTH_INTERVAL_SECS);
    let cancel = CancellationToken::new();
    let scheduler = HealthScheduler::start(
        Arc::clone(&registry),
        Duration::from_secs(interval),
        cancel.clone(),
    );

    info!(services = registered.len(), interval_secs = interval, "Bridge running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down");
    cancel.cancel();
    scheduler.stop().await;

    for name in registered {
        if let Err(e) = registry.unregister(&name).await {
            warn!(service = %name, error = %e, "Unregister failed during shutdown");
        }
    }

    ExitCode::SUCCESS
}
