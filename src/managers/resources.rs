//! Resource manager

use std::sync::Arc;

use crate::protocol::{Resource, ResourceContents};
use crate::resources::ReadableResource;
use crate::{Error, Result};

use super::store::{Capability, CapabilityStore, ListChangedCallback};

type ManagedResource = Arc<dyn ReadableResource>;

impl Capability for ManagedResource {
    type Descriptor = Resource;

    fn key(&self) -> &str {
        &self.definition().uri
    }
    fn service_key(&self) -> &str {
        &self.definition().service_id
    }
    fn descriptor(&self) -> Resource {
        self.definition().clone()
    }
}

/// Registry of readable resources keyed by URI
pub struct ResourceManager {
    store: CapabilityStore<ManagedResource>,
}

impl ResourceManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { store: CapabilityStore::new("resource") }
    }

    /// O(1) lookup by URI.
    #[must_use]
    pub fn get_resource(&self, uri: &str) -> Option<Arc<dyn ReadableResource>> {
        self.store.get(uri)
    }

    /// Insert or overwrite a resource. Fires the list-changed callback once.
    pub fn add_resource(&self, resource: Arc<dyn ReadableResource>) {
        self.store.add(resource);
    }

    /// Remove a resource by URI; no-op when absent.
    pub fn remove_resource(&self, uri: &str) -> bool {
        self.store.remove(uri)
    }

    /// Snapshot of all resource descriptors (defensive copy).
    #[must_use]
    pub fn list_resources(&self) -> Vec<Resource> {
        self.store.list()
    }

    /// Remove every resource owned by `service_id`.
    pub fn clear_resources_for_service(&self, service_id: &str) -> usize {
        self.store.clear_for_service(service_id)
    }

    /// Number of resources owned by `service_id`. O(1).
    #[must_use]
    pub fn resource_count_for_service(&self, service_id: &str) -> usize {
        self.store.count_for_service(service_id)
    }

    /// Total number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// True when no resources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the single list-changed callback.
    pub fn on_list_changed(&self, callback: ListChangedCallback) {
        self.store.set_on_changed(callback);
    }

    /// Read a resource by URI. The read runs outside the manager lock.
    pub async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let resource = self
            .get_resource(uri)
            .ok_or_else(|| Error::Resource(format!("resource \"{uri}\" not found")))?;
        resource.read().await
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedResource {
        definition: Resource,
        body: String,
    }

    #[async_trait]
    impl ReadableResource for FixedResource {
        fn definition(&self) -> &Resource {
            &self.definition
        }

        async fn read(&self) -> Result<Vec<ResourceContents>> {
            Ok(vec![ResourceContents::Text {
                uri: self.definition.uri.clone(),
                mime_type: self.definition.mime_type.clone(),
                text: self.body.clone(),
            }])
        }
    }

    fn fixed(uri: &str, service: &str, body: &str) -> Arc<dyn ReadableResource> {
        Arc::new(FixedResource {
            definition: Resource {
                uri: uri.into(),
                name: uri.into(),
                service_id: service.into(),
                description: None,
                mime_type: Some("text/plain".into()),
                size: None,
            },
            body: body.into(),
        })
    }

    #[tokio::test]
    async fn read_through_manager() {
        let manager = ResourceManager::new();
        manager.add_resource(fixed("doc://a", "s1", "hello"));

        let contents = manager.read("doc://a").await.unwrap();
        assert_eq!(
            contents,
            vec![ResourceContents::Text {
                uri: "doc://a".into(),
                mime_type: Some("text/plain".into()),
                text: "hello".into(),
            }]
        );
    }

    #[tokio::test]
    async fn read_missing_uri_fails() {
        let manager = ResourceManager::new();
        let err = manager.read("doc://missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn listing_and_per_service_clear() {
        let manager = ResourceManager::new();
        manager.add_resource(fixed("doc://a", "s1", "x"));
        manager.add_resource(fixed("doc://b", "s1", "y"));
        manager.add_resource(fixed("doc://c", "s2", "z"));

        assert_eq!(manager.list_resources().len(), 3);
        assert_eq!(manager.resource_count_for_service("s1"), 2);

        assert_eq!(manager.clear_resources_for_service("s1"), 2);
        let left = manager.list_resources();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].uri, "doc://c");
    }
}
