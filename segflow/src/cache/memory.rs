//! Process-local cache store.

use super::{CacheEntry, CacheStore};
use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Keeps entries in a concurrent map for the lifetime of the store.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<(String, String), CacheEntry>,
}

impl InMemoryCache {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of entries written for `step`.
    #[must_use]
    pub fn entries_for(&self, step: &str) -> usize {
        self.entries.iter().filter(|e| e.key().0 == step).count()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, step: &str, fingerprint: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .entries
            .get(&(step.to_string(), fingerprint.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.entries
            .insert((entry.step.clone(), entry.fingerprint.clone()), entry.clone());
        Ok(())
    }

    async fn remove(&self, step: &str, fingerprint: &str) -> Result<()> {
        self.entries.remove(&(step.to_string(), fingerprint.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePayload;
    use crate::core::StepData;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_remove() {
        let cache = InMemoryCache::new();
        let data = StepData::from([("x".to_string(), json!([1]))]);
        cache.put(&CacheEntry::materialized("loader", "abc", data)).await.unwrap();

        let hit = cache.get("loader", "abc").await.unwrap().unwrap();
        assert_eq!(hit.step, "loader");
        assert_eq!(cache.entries_for("loader"), 1);
        assert!(cache.get("loader", "other").await.unwrap().is_none());

        cache.remove("loader", "abc").await.unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_replaces_same_key() {
        let cache = InMemoryCache::new();
        tokio_test::block_on(async {
            let first = StepData::from([("x".to_string(), json!(1))]);
            let second = StepData::from([("x".to_string(), json!(2))]);
            cache.put(&CacheEntry::materialized("unet", "k", first)).await.unwrap();
            cache.put(&CacheEntry::materialized("unet", "k", second.clone())).await.unwrap();

            let hit = cache.get("unet", "k").await.unwrap().unwrap();
            assert_eq!(hit.payload, CachePayload::Materialized(second));
        });
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
