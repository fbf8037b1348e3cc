use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use object_store::memory::InMemory;

use super::{BackendKind, BucketProvider};
use crate::error::{ObjStoreError, Result};
use crate::{Bucket, ObjectStoreBucket};

/// Process-local buckets, always available.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    buckets: Mutex<HashMap<String, Arc<InMemory>>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = buckets.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BucketProvider for InMemoryProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn create_named(&self, name: &str) -> Result<Arc<dyn Bucket>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if buckets.contains_key(name) {
            return Err(ObjStoreError::BucketExists(name.to_string()));
        }

        let store = Arc::new(InMemory::new());
        buckets.insert(name.to_string(), store.clone());
        log::debug!("Created in-memory bucket {name}");

        Ok(Arc::new(ObjectStoreBucket::new(name, store)))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let store = self
            .buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .ok_or_else(|| ObjStoreError::NotFound(name.to_string()))?;

        let removed = super::empty_store(store.as_ref()).await?;
        log::debug!("Removed in-memory bucket {name} with {removed} objects");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_create_and_remove() {
        let provider = InMemoryProvider::new();
        let bucket = provider.create_named("first").await.unwrap();
        bucket.put("obj", Bytes::from_static(b"1")).await.unwrap();

        assert_eq!(provider.bucket_names(), vec!["first"]);

        provider.remove("first").await.unwrap();
        assert!(provider.bucket_names().is_empty());
        // The handle stays usable but the objects are gone.
        assert!(!bucket.exists("obj").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let provider = InMemoryProvider::new();
        provider.create_named("dup").await.unwrap();

        let err = provider.create_named("dup").await.unwrap_err();
        assert_eq!(err.to_string(), "bucket already exists: dup");
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let provider = InMemoryProvider::new();
        let a = provider.create_named("a").await.unwrap();
        let b = provider.create_named("b").await.unwrap();

        a.put("shared", Bytes::from_static(b"a")).await.unwrap();
        assert!(!b.exists("shared").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_unknown_bucket() {
        let provider = InMemoryProvider::new();
        assert!(provider.remove("ghost").await.unwrap_err().is_not_found());
    }
}
