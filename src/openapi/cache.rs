//! Parsed-document cache keyed by content fingerprint

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::Result;

use super::document::{Document, Operation, parse_document};

/// How long a parsed document stays valid.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A parsed document shared between registrations.
pub type ParsedSpec = Arc<(Vec<Operation>, Document)>;

struct CacheEntry {
    parsed: ParsedSpec,
    stored_at: Instant,
}

/// Cache of parsed OpenAPI documents, keyed by the SHA-256 of their raw
/// bytes, so repeated registrations of an identical spec skip the parse.
pub struct DocumentCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl DocumentCache {
    /// Cache with the default 5 minute TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Parse `content`, reusing a cached result when the same bytes were
    /// parsed within the TTL.
    pub fn get_or_parse(&self, content: &[u8]) -> Result<ParsedSpec> {
        let fingerprint = hex::encode(Sha256::digest(content));

        {
            let entries = self.entries.lock();
            if let Some(entry) = entries.get(&fingerprint) {
                if entry.stored_at.elapsed() < self.ttl {
                    debug!(fingerprint = %fingerprint, "Spec cache hit");
                    return Ok(Arc::clone(&entry.parsed));
                }
            }
        }

        let parsed: ParsedSpec = Arc::new(parse_document(content)?);
        self.entries
            .lock()
            .insert(fingerprint, CacheEntry { parsed: Arc::clone(&parsed), stored_at: Instant::now() });
        Ok(parsed)
    }

    /// Drop every cached document.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"{"openapi":"3.0.0","info":{"title":"t","version":"1"},"paths":{}}"#;

    #[test]
    fn identical_bytes_share_a_parse() {
        let cache = DocumentCache::new();
        let first = cache.get_or_parse(SPEC.as_bytes()).unwrap();
        let second = cache.get_or_parse(SPEC.as_bytes()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn expired_entries_reparse() {
        let cache = DocumentCache::with_ttl(Duration::from_millis(0));
        let first = cache.get_or_parse(SPEC.as_bytes()).unwrap();
        let second = cache.get_or_parse(SPEC.as_bytes()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn parse_errors_are_not_cached() {
        let cache = DocumentCache::new();
        assert!(cache.get_or_parse(b"not: [valid").is_err());
        assert!(cache.get_or_parse(SPEC.as_bytes()).is_ok());
    }
}
