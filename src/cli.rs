//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Service-integration router - expose OpenAPI, SQL, S3, browser and
/// static upstreams as tools, resources and prompts
#[derive(Parser, Debug)]
#[command(name = "mcp-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds between periodic health checks
    #[arg(long, env = "MCP_BRIDGE_HEALTH_INTERVAL")]
    pub health_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_BRIDGE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MCP_BRIDGE_LOG_FORMAT")]
    pub log_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["mcp-bridge"]);
        assert!(cli.config.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from([
            "mcp-bridge",
            "--config",
            "bridge.yaml",
            "--health-interval",
            "60",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.config.unwrap(), PathBuf::from("bridge.yaml"));
        assert_eq!(cli.health_interval, Some(60));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }
}
