//! OpenAPI 3 to capability translation
//!
//! Parses an OpenAPI document, extracts its operations, and produces tool
//! descriptors with JSON-Schema-shaped input and output. Parsed documents
//! are cached by content fingerprint.

mod cache;
mod document;
mod translate;

use std::time::Duration;

use tracing::{error, warn};

use crate::config::OpenApiServiceConfig;
use crate::security::SafeDialer;
use crate::{Error, Result};

pub use cache::DocumentCache;
pub use document::{Document, Operation, ParameterLocation, ParameterObject, parse_document};
pub use translate::{ToolDescriptor, convert_operation, convert_schema, sanitize_tool_name};

/// Timeout for fetching a spec by URL.
const SPEC_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Obtain the raw spec bytes: inline content when declared, otherwise a
/// SafeNet-backed fetch of `spec_url`.
///
/// A fetch failure is logged and surfaced as missing content, so a later
/// re-registration can succeed once the URL becomes reachable.
pub async fn acquire_spec(config: &OpenApiServiceConfig, dialer: &SafeDialer) -> Result<Vec<u8>> {
    if let Some(content) = &config.spec_content {
        if !content.trim().is_empty() {
            return Ok(content.clone().into_bytes());
        }
    }

    let Some(url_str) = config.spec_url.as_deref() else {
        return Err(Error::OpenApi(
            "OpenAPI spec content is missing and no spec_url is configured".to_string(),
        ));
    };

    match fetch_spec(url_str, dialer).await {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => {
            warn!(url = %url_str, "Spec URL returned an empty body");
            Err(missing_spec(url_str))
        }
        Err(e) => {
            error!(url = %url_str, error = %e, "Failed to fetch OpenAPI spec");
            Err(missing_spec(url_str))
        }
    }
}

fn missing_spec(url: &str) -> Error {
    Error::OpenApi(format!("OpenAPI spec content is missing or failed to load from {url}"))
}

async fn fetch_spec(url_str: &str, dialer: &SafeDialer) -> Result<Vec<u8>> {
    let url = url::Url::parse(url_str)
        .map_err(|e| Error::OpenApi(format!("invalid spec_url \"{url_str}\": {e}")))?;
    let client = dialer.http_client(&url, SPEC_FETCH_TIMEOUT).await?;
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::OpenApi(format!("unexpected status {status} fetching {url_str}")));
    }
    Ok(response.bytes().await?.to_vec())
}
