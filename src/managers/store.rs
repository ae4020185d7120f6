//! Shared capability-store mechanics
//!
//! The tool, resource and prompt managers all wrap [`CapabilityStore`]:
//! a primary `key -> entry` map plus a `service -> keys` secondary index,
//! both updated together under one write lock, with a copy-on-write list
//! snapshot and a replaceable list-changed callback.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Callback invoked after every successful mutation.
pub type ListChangedCallback = Arc<dyn Fn() + Send + Sync>;

/// An entry a capability store can hold.
pub(crate) trait Capability: Clone + Send + Sync + 'static {
    /// Listing element type (the wire descriptor).
    type Descriptor: Clone + Send + Sync;

    /// Primary key (tool/prompt name, resource URI).
    fn key(&self) -> &str;
    /// Owning service key.
    fn service_key(&self) -> &str;
    /// Wire descriptor for listings.
    fn descriptor(&self) -> Self::Descriptor;
}

struct Inner<T: Capability> {
    entries: HashMap<String, T>,
    by_service: HashMap<String, HashSet<String>>,
    /// Listing snapshot; `None` after any mutation, rebuilt on demand.
    snapshot: Option<Arc<Vec<T::Descriptor>>>,
}

pub(crate) struct CapabilityStore<T: Capability> {
    /// Entry noun for logs ("tool", "resource", "prompt")
    what: &'static str,
    inner: RwLock<Inner<T>>,
    on_changed: Mutex<Option<ListChangedCallback>>,
}

impl<T: Capability> CapabilityStore<T> {
    pub(crate) fn new(what: &'static str) -> Self {
        Self {
            what,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                by_service: HashMap::new(),
                snapshot: None,
            }),
            on_changed: Mutex::new(None),
        }
    }

    /// O(1) lookup by primary key.
    pub(crate) fn get(&self, key: &str) -> Option<T> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Insert or overwrite. When an overwrite moves the key to a different
    /// service, the old service's index entry is dropped.
    pub(crate) fn add(&self, item: T) {
        let key = item.key().to_string();
        let service = item.service_key().to_string();
        {
            let mut inner = self.inner.write();
            let old_service = inner.entries.get(&key).map(|p| p.service_key().to_string());
            if let Some(old_service) = old_service {
                if old_service != service {
                    detach(&mut inner.by_service, &old_service, &key);
                }
            }
            inner.by_service.entry(service.clone()).or_default().insert(key.clone());
            inner.entries.insert(key.clone(), item);
            inner.snapshot = None;
        }
        debug!(what = self.what, key = %key, service = %service, "Capability added");
        self.notify();
    }

    /// Remove by key; no-op (and no callback) when absent.
    pub(crate) fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.entries.remove(key) {
                Some(entry) => {
                    let service = entry.service_key().to_string();
                    detach(&mut inner.by_service, &service, key);
                    inner.snapshot = None;
                    true
                }
                None => false,
            }
        };
        if removed {
            debug!(what = self.what, key = %key, "Capability removed");
            self.notify();
        }
        removed
    }

    /// Remove every entry owned by `service` in O(k) via the secondary
    /// index. Fires the callback once, and only if something was removed.
    pub(crate) fn clear_for_service(&self, service: &str) -> usize {
        let removed = {
            let mut inner = self.inner.write();
            match inner.by_service.remove(service) {
                Some(keys) => {
                    for key in &keys {
                        inner.entries.remove(key);
                    }
                    inner.snapshot = None;
                    keys.len()
                }
                None => 0,
            }
        };
        if removed > 0 {
            debug!(what = self.what, service = %service, count = removed, "Capabilities cleared");
            self.notify();
        }
        removed
    }

    /// Snapshot listing. Callers receive a defensive copy and may not
    /// assume identity across calls.
    pub(crate) fn list(&self) -> Vec<T::Descriptor> {
        if let Some(snapshot) = self.inner.read().snapshot.clone() {
            return (*snapshot).clone();
        }
        let mut inner = self.inner.write();
        if let Some(snapshot) = inner.snapshot.clone() {
            return (*snapshot).clone();
        }
        let built: Arc<Vec<T::Descriptor>> =
            Arc::new(inner.entries.values().map(Capability::descriptor).collect());
        inner.snapshot = Some(Arc::clone(&built));
        (*built).clone()
    }

    /// Entries owned by `service`, via the counted index. O(1).
    pub(crate) fn count_for_service(&self, service: &str) -> usize {
        self.inner.read().by_service.get(service).map_or(0, HashSet::len)
    }

    /// Total entry count.
    pub(crate) fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Replace the single registered list-changed callback.
    pub(crate) fn set_on_changed(&self, callback: ListChangedCallback) {
        *self.on_changed.lock() = Some(callback);
    }

    /// Invoke the callback outside every lock, so it may call back into
    /// the manager.
    fn notify(&self) {
        let callback = self.on_changed.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

fn detach(index: &mut HashMap<String, HashSet<String>>, service: &str, key: &str) {
    if let Some(keys) = index.get_mut(service) {
        keys.remove(key);
        if keys.is_empty() {
            index.remove(service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Entry {
        key: String,
        service: String,
    }

    impl Capability for Entry {
        type Descriptor = String;

        fn key(&self) -> &str {
            &self.key
        }
        fn service_key(&self) -> &str {
            &self.service
        }
        fn descriptor(&self) -> String {
            self.key.clone()
        }
    }

    fn entry(key: &str, service: &str) -> Entry {
        Entry { key: key.into(), service: service.into() }
    }

    fn counting_store() -> (Arc<CapabilityStore<Entry>>, Arc<AtomicUsize>) {
        let store = Arc::new(CapabilityStore::new("entry"));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        store.set_on_changed(Arc::new(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        }));
        (store, fired)
    }

    #[test]
    fn add_get_remove() {
        let (store, _) = counting_store();
        store.add(entry("a", "s1"));
        assert!(store.get("a").is_some());
        assert!(store.remove("a"));
        assert!(store.get("a").is_none());
    }

    #[test]
    fn one_callback_per_successful_mutation() {
        let (store, fired) = counting_store();
        store.add(entry("a", "s1")); // 1
        store.add(entry("a", "s1")); // 2 (overwrite still mutates)
        store.remove("a"); // 3
        store.remove("a"); // absent: no callback
        store.clear_for_service("s1"); // empty: no callback
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn clear_for_service_is_indexed() {
        let (store, fired) = counting_store();
        for k in ["a", "b", "c"] {
            store.add(entry(k, "s1"));
        }
        store.add(entry("d", "s2"));
        assert_eq!(store.count_for_service("s1"), 3);

        let removed = store.clear_for_service("s1");
        assert_eq!(removed, 3);
        assert_eq!(store.count_for_service("s1"), 0);
        assert_eq!(store.count_for_service("s2"), 1);
        // 4 adds + 1 clear
        assert_eq!(fired.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn overwrite_across_services_moves_index_entry() {
        let (store, _) = counting_store();
        store.add(entry("a", "s1"));
        store.add(entry("a", "s2"));
        assert_eq!(store.count_for_service("s1"), 0);
        assert_eq!(store.count_for_service("s2"), 1);
        // clearing the old owner must not touch the entry
        store.clear_for_service("s1");
        assert!(store.get("a").is_some());
    }

    #[test]
    fn list_returns_snapshot_copies() {
        let (store, _) = counting_store();
        store.add(entry("a", "s1"));
        let first = store.list();
        store.add(entry("b", "s1"));
        let second = store.list();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
        // the earlier copy is unaffected by the mutation
        assert_eq!(first, vec!["a".to_string()]);
    }

    #[test]
    fn callback_may_reenter_the_store() {
        let store = Arc::new(CapabilityStore::<Entry>::new("entry"));
        let store2 = Arc::clone(&store);
        store.set_on_changed(Arc::new(move || {
            // reentrancy: runs outside the store lock
            let _ = store2.list();
        }));
        store.add(entry("a", "s1"));
        assert_eq!(store.len(), 1);
    }
}
