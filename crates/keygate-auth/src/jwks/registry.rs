//! Share one [`KeySetCache`] per JWKS URL.

use super::cache::{CacheSettings, KeySetCache};
use super::fetch::KeySetFetcher;
use crate::error::FetchError;

use dashmap::DashMap;
use std::sync::Arc;

/// Caches keyed by JWKS URL, for services that trust several providers or
/// build several verifiers against the same one.
#[derive(Debug, Default)]
pub struct KeySetRegistry {
    caches: DashMap<String, Arc<KeySetCache>>,
}

impl KeySetRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache for `jwks_url`, creating an HTTP-backed one on first use.
    ///
    /// Settings only apply when the cache is created.
    ///
    /// # Errors
    ///
    /// [`FetchError::InsecureUrl`] for non-HTTPS endpoints.
    #[cfg(feature = "fetch-reqwest")]
    pub fn http(
        &self,
        jwks_url: &str,
        settings: &CacheSettings,
    ) -> Result<Arc<KeySetCache>, FetchError> {
        if let Some(cache) = self.caches.get(jwks_url) {
            return Ok(Arc::clone(cache.value()));
        }
        let fetcher = super::fetch::HttpJwksFetcher::new(jwks_url, settings.fetch_timeout)?;
        Ok(self.get_or_insert_with(jwks_url, || {
            KeySetCache::new(Arc::new(fetcher), settings.clone())
        }))
    }

    /// The cache registered under `key`, or one built from `fetcher`.
    pub fn get_or_insert(
        &self,
        key: &str,
        fetcher: Arc<dyn KeySetFetcher>,
        settings: &CacheSettings,
    ) -> Arc<KeySetCache> {
        self.get_or_insert_with(key, || KeySetCache::new(fetcher, settings.clone()))
    }

    fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> KeySetCache) -> Arc<KeySetCache> {
        let entry = self
            .caches
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(make()));
        Arc::clone(entry.value())
    }

    /// Drop the cache for `key`; verifiers holding it keep working.
    pub fn remove(&self, key: &str) -> Option<Arc<KeySetCache>> {
        self.caches.remove(key).map(|(_, cache)| cache)
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// True when no cache is registered.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::fetch::StaticJwks;
    use crate::jwks::test_keys::{RSA_A, document};

    #[test]
    fn same_key_same_cache() {
        let registry = KeySetRegistry::new();
        let fetcher: Arc<dyn KeySetFetcher> =
            Arc::new(StaticJwks::from_document(document(&[RSA_A])));
        let settings = CacheSettings::default();

        let a = registry.get_or_insert("tenant-a", Arc::clone(&fetcher), &settings);
        let b = registry.get_or_insert("tenant-a", Arc::clone(&fetcher), &settings);
        let c = registry.get_or_insert("tenant-b", fetcher, &settings);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert!(registry.remove("tenant-a").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[cfg(feature = "fetch-reqwest")]
    #[test]
    fn http_caches_refuse_plain_http() {
        let registry = KeySetRegistry::new();
        let settings = CacheSettings::default();
        assert!(registry.http("http://idp.example.com/jwks", &settings).is_err());
        let a = registry
            .http("https://idp.example.com/.well-known/jwks.json", &settings)
            .unwrap();
        let b = registry
            .http("https://idp.example.com/.well-known/jwks.json", &settings)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
