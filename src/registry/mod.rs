//! Service registry
//!
//! Owns the authoritative map of registered services, orchestrates
//! registration under partial failure, schedules health checks, and
//! redacts secrets on every read path.

mod health;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::AuthRegistry;
use crate::config::{ServiceConfig, ServiceKind, service_fingerprint};
use crate::history::{HealthSample, RingHistory};
use crate::openapi::DocumentCache;
use crate::secrets::strip_secrets_from_service;
use crate::security::SafeDialer;
use crate::upstream::{Managers, Registration, Upstream, build_upstream};
use crate::{Error, Result};

pub use health::HealthScheduler;

/// Timeout applied to each individual health check.
pub(crate) const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
/// Samples retained per service.
const HISTORY_CAPACITY: usize = 50;

/// Redacted, runtime-enriched view of one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Human-visible name
    pub name: String,
    /// Hex SHA-256 fingerprint of the name
    pub id: String,
    /// Sanitized primary key
    pub key: String,
    /// Adapter kind
    pub kind: ServiceKind,
    /// Redacted configuration
    pub config: ServiceConfig,
    /// Registration error if present, else health error
    pub last_error: Option<String>,
    /// Tools currently owned by the service
    pub tool_count: usize,
    /// Prompts currently owned by the service
    pub prompt_count: usize,
    /// Resources currently owned by the service
    pub resource_count: usize,
}

struct State {
    configs: HashMap<String, ServiceConfig>,
    upstreams: HashMap<String, Arc<dyn Upstream>>,
    service_errors: HashMap<String, String>,
    health_errors: HashMap<String, String>,
    histories: HashMap<String, Arc<RingHistory>>,
}

/// Builds the adapter for a service config.
pub type UpstreamFactory =
    Box<dyn Fn(&ServiceConfig) -> Result<Arc<dyn Upstream>> + Send + Sync>;

/// Registry of upstream services
pub struct ServiceRegistry {
    state: RwLock<State>,
    managers: Managers,
    auth: Arc<AuthRegistry>,
    factory: UpstreamFactory,
}

impl ServiceRegistry {
    /// Create a registry publishing into the given managers, with the
    /// standard adapter factory built over the dialer.
    #[must_use]
    pub fn new(managers: Managers, dialer: SafeDialer) -> Self {
        let spec_cache = Arc::new(DocumentCache::new());
        Self::with_factory(
            managers,
            Box::new(move |config| build_upstream(config, &dialer, &spec_cache)),
        )
    }

    /// Create a registry with a custom adapter factory.
    #[must_use]
    pub fn with_factory(managers: Managers, factory: UpstreamFactory) -> Self {
        Self {
            state: RwLock::new(State {
                configs: HashMap::new(),
                upstreams: HashMap::new(),
                service_errors: HashMap::new(),
                health_errors: HashMap::new(),
                histories: HashMap::new(),
            }),
            managers,
            auth: Arc::new(AuthRegistry::new()),
            factory,
        }
    }

    /// The shared capability managers.
    #[must_use]
    pub fn managers(&self) -> &Managers {
        &self.managers
    }

    /// The caller-facing authenticator registry.
    #[must_use]
    pub fn auth(&self) -> &Arc<AuthRegistry> {
        &self.auth
    }

    /// Register a service: build its adapter, run discovery, publish its
    /// capabilities, and run an initial health check.
    ///
    /// The registry lock is released across the adapter's discovery call so
    /// other services can register concurrently; a concurrent unregister of
    /// the same name wins and leaves no residue.
    pub async fn register(&self, config: ServiceConfig) -> Result<Registration> {
        let name = config.name.clone();
        let key = config.sanitized_name();

        // 1-3: record config, build adapter, install it - all under one lock
        let upstream = {
            let mut state = self.state.write();
            if state.configs.contains_key(&key) && state.upstreams.contains_key(&key) {
                return Err(Error::Registry(format!(
                    "service with name \"{name}\" already registered"
                )));
            }
            state.configs.insert(key.clone(), config.clone());
            state.service_errors.remove(&key);

            match (self.factory)(&config) {
                Ok(upstream) => {
                    state.upstreams.insert(key.clone(), Arc::clone(&upstream));
                    upstream
                }
                Err(e) => {
                    // config entry stays so the failure remains visible and
                    // a corrected retry is possible
                    state.service_errors.insert(key.clone(), e.to_string());
                    return Err(e);
                }
            }
        };

        // snapshot current ownership so duplicates can be flagged after
        // discovery overwrites them
        let owners_before: HashMap<String, String> = self
            .managers
            .tools
            .list_tools()
            .into_iter()
            .map(|tool| (tool.name, tool.service_id))
            .collect();

        // 4: discovery runs without the registry lock
        let outcome = upstream.register(&self.managers, false).await;

        // 5: a concurrent unregister wins over this registration
        let vanished = {
            let mut state = self.state.write();
            if state.configs.contains_key(&key) {
                false
            } else {
                // only evict the instance this call installed; a later
                // register may already own the slot
                let ours = state.upstreams.get(&key).is_some_and(|u| Arc::ptr_eq(u, &upstream));
                if ours {
                    state.upstreams.remove(&key);
                }
                true
            }
        };
        if vanished {
            if let Err(e) = upstream.shutdown().await {
                warn!(service = %name, error = %e, "Shutdown after lost race failed");
            }
            self.clear_capabilities(&key);
            self.auth.remove(&key);
            let detail = match outcome {
                Ok(_) => String::new(),
                Err(e) => format!(": {e}"),
            };
            return Err(Error::Registry(format!(
                "service \"{name}\" was unregistered during registration{detail}"
            )));
        }

        // 6: discovery failure keeps the config entry, removes the adapter
        let registration = match outcome {
            Ok(registration) => registration,
            Err(e) => {
                {
                    let mut state = self.state.write();
                    state.service_errors.insert(key.clone(), e.to_string());
                    let ours =
                        state.upstreams.get(&key).is_some_and(|u| Arc::ptr_eq(u, &upstream));
                    if ours {
                        state.upstreams.remove(&key);
                    }
                }
                if let Err(shutdown_err) = upstream.shutdown().await {
                    warn!(service = %name, error = %shutdown_err, "Shutdown after failed discovery");
                }
                self.clear_capabilities(&key);
                return Err(e);
            }
        };

        for tool in &registration.tools {
            if let Some(previous_owner) = owners_before.get(&tool.name) {
                if previous_owner != &key {
                    warn!(
                        tool = %tool.name,
                        service = %key,
                        previous = %previous_owner,
                        "Duplicate tool name across services"
                    );
                }
            }
        }

        // 7: initial health check with the standard per-check timeout
        if upstream.health_checker().is_some() {
            self.check_one(&key, &upstream).await;
        }

        // 8: caller-facing authenticators
        if let Some(authentication) = &config.authentication {
            self.auth.install(&key, authentication);
        }

        info!(service = %name, key = %key, tools = registration.tools.len(), "Service registered");
        Ok(registration)
    }

    /// Remove a service and every capability it owns. Cleanup runs to
    /// completion even when the adapter's shutdown fails; that failure is
    /// returned at the end.
    pub async fn unregister(&self, service_name: &str) -> Result<()> {
        let key = crate::config::sanitize_service_name(service_name);

        let upstream = {
            let mut state = self.state.write();
            if !state.configs.contains_key(&key) && !state.upstreams.contains_key(&key) {
                return Err(Error::Registry(format!(
                    "service \"{service_name}\" (id: {}) not found",
                    service_fingerprint(service_name)
                )));
            }
            state.configs.remove(&key);
            state.service_errors.remove(&key);
            state.health_errors.remove(&key);
            state.histories.remove(&key);
            state.upstreams.remove(&key)
        };

        let mut shutdown_error = None;
        if let Some(upstream) = upstream {
            if let Err(e) = upstream.shutdown().await {
                warn!(service = %service_name, error = %e, "Adapter shutdown failed");
                shutdown_error = Some(e);
            }
        }

        self.clear_capabilities(&key);
        self.auth.remove(&key);

        info!(service = %service_name, key = %key, "Service unregistered");
        match shutdown_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn clear_capabilities(&self, key: &str) {
        // resources first: a dynamic resource must not outlive its tool
        self.managers.resources.clear_resources_for_service(key);
        self.managers.tools.clear_tools_for_service(key);
        self.managers.prompts.clear_prompts_for_service(key);
    }

    /// Redacted configuration for one service.
    pub fn get_service_config(&self, service_name: &str) -> Result<ServiceConfig> {
        let key = crate::config::sanitize_service_name(service_name);
        let state = self.state.read();
        state
            .configs
            .get(&key)
            .map(strip_secrets_from_service)
            .ok_or_else(|| Error::Registry(format!("service \"{service_name}\" not found")))
    }

    /// Redacted, runtime-enriched view of one service.
    pub fn get_service_info(&self, service_name: &str) -> Result<ServiceInfo> {
        let key = crate::config::sanitize_service_name(service_name);
        let state = self.state.read();
        let config = state
            .configs
            .get(&key)
            .ok_or_else(|| Error::Registry(format!("service \"{service_name}\" not found")))?;
        Ok(self.info_for(&key, config, &state))
    }

    /// Redacted, runtime-enriched views of every service.
    #[must_use]
    pub fn get_all_services(&self) -> Vec<ServiceInfo> {
        let state = self.state.read();
        let mut infos: Vec<ServiceInfo> = state
            .configs
            .iter()
            .map(|(key, config)| self.info_for(key, config, &state))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    fn info_for(&self, key: &str, config: &ServiceConfig, state: &State) -> ServiceInfo {
        let last_error = state
            .service_errors
            .get(key)
            .or_else(|| state.health_errors.get(key))
            .cloned();
        ServiceInfo {
            name: config.name.clone(),
            id: config.id(),
            key: key.to_string(),
            kind: config.kind,
            config: strip_secrets_from_service(config),
            last_error,
            tool_count: self.managers.tools.tool_count_for_service(key),
            prompt_count: self.managers.prompts.prompt_count_for_service(key),
            resource_count: self.managers.resources.resource_count_for_service(key),
        }
    }

    /// The service's current error: the registration error when present,
    /// else the latest health error. The flag reports whether any error is
    /// set.
    #[must_use]
    pub fn get_service_error(&self, service_name: &str) -> (String, bool) {
        let key = crate::config::sanitize_service_name(service_name);
        let state = self.state.read();
        match state.service_errors.get(&key).or_else(|| state.health_errors.get(&key)) {
            Some(message) => (message.clone(), true),
            None => (String::new(), false),
        }
    }

    /// Health samples for a service, oldest first.
    #[must_use]
    pub fn health_history(&self, service_name: &str) -> Vec<HealthSample> {
        let key = crate::config::sanitize_service_name(service_name);
        let history = self.state.read().histories.get(&key).cloned();
        history.map_or_else(Vec::new, |h| h.get_all())
    }

    /// Run one timed health check against an upstream and record the
    /// outcome.
    pub(crate) async fn check_one(&self, key: &str, upstream: &Arc<dyn Upstream>) {
        let Some(checker) = upstream.health_checker() else { return };
        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(HEALTH_CHECK_TIMEOUT, checker.check_health()).await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "health check timed out after {}s",
                HEALTH_CHECK_TIMEOUT.as_secs()
            )),
        };
        self.record_health(key, latency, result);
    }

    fn record_health(&self, key: &str, latency: Duration, result: std::result::Result<(), String>) {
        let history = {
            let mut state = self.state.write();
            match &result {
                Ok(()) => {
                    state.health_errors.remove(key);
                }
                Err(message) => {
                    state.health_errors.insert(key.to_string(), message.clone());
                }
            }
            Arc::clone(
                state
                    .histories
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(RingHistory::new(HISTORY_CAPACITY))),
            )
        };
        match result {
            Ok(()) => history.add(HealthSample::ok(latency)),
            Err(message) => history.add(HealthSample::error(latency, message)),
        }
    }

    /// Snapshot of upstreams for the health pass.
    pub(crate) fn upstream_snapshot(&self) -> Vec<(String, Arc<dyn Upstream>)> {
        self.state
            .read()
            .upstreams
            .iter()
            .map(|(key, upstream)| (key.clone(), Arc::clone(upstream)))
            .collect()
    }
}
