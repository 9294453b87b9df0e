//! In-process object store for single-process deployments and tests.
//!
//! Buckets map to sorted key/size maps; listing pages through keys in
//! ascending order the way a real object store API does.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use railyard_core::subscription::{ObjectEntry, ObjectStore};
use railyard_types::error::SubscriptionError;

/// In-memory object store keyed by bucket then object key.
#[derive(Clone, Default)]
pub struct InMemoryObjectStore {
    buckets: Arc<Mutex<BTreeMap<String, BTreeMap<String, i64>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, size_bytes: i64) {
        let mut buckets = self.buckets.lock().expect("object store lock poisoned");
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), size_bytes);
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        let mut buckets = self.buckets.lock().expect("object store lock poisoned");
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
    }
}

impl ObjectStore for InMemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectEntry>, SubscriptionError> {
        let buckets = self.buckets.lock().expect("object store lock poisoned");
        let Some(objects) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let lower = match start_after {
            Some(key) => Bound::Excluded(key.to_string()),
            None => Bound::Unbounded,
        };
        Ok(objects
            .range((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, size)| ObjectEntry {
                key: key.clone(),
                size_bytes: *size,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_orders_by_key_and_respects_prefix() {
        let store = InMemoryObjectStore::new();
        store.put("lake", "raw/clicks/b", 2);
        store.put("lake", "raw/clicks/a", 1);
        store.put("lake", "curated/x", 9);

        let page = store.list_page("lake", "raw/", None, 10).await.unwrap();
        let keys: Vec<&str> = page.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["raw/clicks/a", "raw/clicks/b"]);
    }

    #[tokio::test]
    async fn test_list_pages_with_start_after() {
        let store = InMemoryObjectStore::new();
        for key in ["raw/a", "raw/b", "raw/c"] {
            store.put("lake", key, 1);
        }

        let first = store.list_page("lake", "raw/", None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let rest = store
            .list_page("lake", "raw/", Some(&first[1].key), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].key, "raw/c");
    }

    #[tokio::test]
    async fn test_unknown_bucket_lists_empty() {
        let store = InMemoryObjectStore::new();
        let page = store.list_page("ghost", "", None, 10).await.unwrap();
        assert!(page.is_empty());
    }
}
