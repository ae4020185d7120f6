//! Per-service authenticator registry
//!
//! Authenticators declared in a service's configuration are installed on
//! successful registration and removed on unregister. They describe how
//! callers must authenticate against the service's capabilities; secret
//! material never leaves this module through any read path.

use dashmap::DashMap;
use serde::Serialize;

use crate::config::AuthenticationConfig;

/// An installed authenticator
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// Shared-key authentication
    ApiKey {
        /// Header the key travels in
        header: String,
        /// The key value (kept internal)
        value: String,
    },
    /// OAuth2 token validation parameters
    OAuth2 {
        /// Token issuer URL
        issuer_url: String,
        /// Expected audience
        audience: String,
    },
}

/// Redacted, listable view of an authenticator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthenticatorInfo {
    /// API-key authenticator is installed for the header
    ApiKey {
        /// Header the key travels in
        header: String,
    },
    /// OAuth2 authenticator parameters (no secret material)
    OAuth2 {
        /// Token issuer URL
        issuer_url: String,
        /// Expected audience
        audience: String,
    },
}

/// Registry of authenticators keyed by service
pub struct AuthRegistry {
    entries: DashMap<String, Vec<Authenticator>>,
}

impl AuthRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Install the authenticators a config declares, replacing any previous
    /// set for the service.
    pub fn install(&self, service_key: &str, config: &AuthenticationConfig) {
        let mut installed = Vec::new();
        if let Some(api_key) = &config.api_key {
            installed.push(Authenticator::ApiKey {
                header: api_key.header.clone().unwrap_or_else(|| "Authorization".to_string()),
                value: api_key.value.clone(),
            });
        }
        if let Some(oauth2) = &config.oauth2 {
            installed.push(Authenticator::OAuth2 {
                issuer_url: oauth2.issuer_url.clone(),
                audience: oauth2.audience.clone(),
            });
        }
        if installed.is_empty() {
            self.entries.remove(service_key);
        } else {
            self.entries.insert(service_key.to_string(), installed);
        }
    }

    /// Remove every authenticator for the service.
    pub fn remove(&self, service_key: &str) {
        self.entries.remove(service_key);
    }

    /// Verify an API key presented for the service. Services without an
    /// API-key authenticator accept any caller.
    #[must_use]
    pub fn verify_api_key(&self, service_key: &str, presented: &str) -> bool {
        match self.entries.get(service_key) {
            Some(installed) => installed.iter().all(|auth| match auth {
                Authenticator::ApiKey { value, .. } => value == presented,
                Authenticator::OAuth2 { .. } => true,
            }),
            None => true,
        }
    }

    /// Redacted listing for a service.
    #[must_use]
    pub fn info(&self, service_key: &str) -> Vec<AuthenticatorInfo> {
        self.entries.get(service_key).map_or_else(Vec::new, |installed| {
            installed
                .iter()
                .map(|auth| match auth {
                    Authenticator::ApiKey { header, .. } => {
                        AuthenticatorInfo::ApiKey { header: header.clone() }
                    }
                    Authenticator::OAuth2 { issuer_url, audience } => AuthenticatorInfo::OAuth2 {
                        issuer_url: issuer_url.clone(),
                        audience: audience.clone(),
                    },
                })
                .collect()
        })
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeyAuthConfig, OAuth2Config};

    fn config() -> AuthenticationConfig {
        AuthenticationConfig {
            api_key: Some(ApiKeyAuthConfig { header: None, value: "s3cret".into() }),
            oauth2: Some(OAuth2Config {
                issuer_url: "https://issuer.example.com".into(),
                audience: "bridge".into(),
                client_secret: Some("oauth-secret".into()),
            }),
        }
    }

    #[test]
    fn install_verify_remove() {
        let registry = AuthRegistry::new();
        registry.install("svc", &config());

        assert!(registry.verify_api_key("svc", "s3cret"));
        assert!(!registry.verify_api_key("svc", "wrong"));

        registry.remove("svc");
        assert!(registry.verify_api_key("svc", "anything"));
    }

    #[test]
    fn info_carries_no_secret_material() {
        let registry = AuthRegistry::new();
        registry.install("svc", &config());

        let rendered = serde_json::to_string(&registry.info("svc")).unwrap();
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("oauth-secret"));
        assert!(rendered.contains("issuer.example.com"));
    }

    #[test]
    fn empty_config_installs_nothing() {
        let registry = AuthRegistry::new();
        registry.install("svc", &AuthenticationConfig::default());
        assert!(registry.info("svc").is_empty());
    }
}
