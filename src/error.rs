//! Error types for the bridge
//!
//! Every user-visible error is a single sentence prefixed with the component
//! that produced it (`registry:`, `openapi:`, `sql:`, ...).

use std::io;

use thiserror::Error;

/// Result type alias for the bridge
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid name, missing variant config, bad URL scheme)
    #[error("config: {0}")]
    Config(String),

    /// Service registry error
    #[error("registry: {0}")]
    Registry(String),

    /// OpenAPI discovery or translation error
    #[error("openapi: {0}")]
    OpenApi(String),

    /// SQL upstream error
    #[error("sql: {0}")]
    Sql(String),

    /// Object-store upstream error
    #[error("s3: {0}")]
    ObjectStore(String),

    /// Browser upstream error
    #[error("browser: {0}")]
    Browser(String),

    /// SSRF-safe dialer error
    #[error("safe-dialer: {0}")]
    SafeDialer(String),

    /// Resource read error
    #[error("resource: {0}")]
    Resource(String),

    /// Tool execution error
    #[error("tool: {0}")]
    Tool(String),

    /// Self-updater integrity or replacement error
    #[error("updater: {0}")]
    Updater(String),

    /// IO error
    #[error("io: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error originated in service configuration rather than
    /// at an upstream or on the network.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_prefixes() {
        assert_eq!(Error::Config("bad name".into()).to_string(), "config: bad name");
        assert_eq!(Error::Sql("boom".into()).to_string(), "sql: boom");
        assert!(
            Error::SafeDialer("no safe public IP found for x".into())
                .to_string()
                .starts_with("safe-dialer:")
        );
    }

    #[test]
    fn io_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
