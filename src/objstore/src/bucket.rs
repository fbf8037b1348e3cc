use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::ObjectStore;
use object_store::path::Path;

use crate::error::{ObjStoreError, Result};
use crate::{Bucket, DIR_DELIM};

/// [`Bucket`] on top of any `object_store` backend.
#[derive(Clone)]
pub struct ObjectStoreBucket {
    name: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBucket {
    pub fn new(name: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

impl fmt::Debug for ObjectStoreBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreBucket")
            .field("name", &self.name)
            .field("store", &self.store.to_string())
            .finish()
    }
}

fn object_path(key: &str) -> Result<Path> {
    Path::parse(key).map_err(|source| ObjStoreError::InvalidKey {
        key: key.to_string(),
        source,
    })
}

#[async_trait]
impl Bucket for ObjectStoreBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let path = object_path(key)?;
        log::debug!("Uploading {} bytes to {}/{key}", data.len(), self.name);
        self.store.put(&path, data.into()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = object_path(key)?;
        let result = self.store.get(&path).await?;
        Ok(result.bytes().await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches(DIR_DELIM);
        let prefix = if prefix.is_empty() {
            None
        } else {
            Some(object_path(prefix)?)
        };

        let listing = self.store.list_with_delimiter(prefix.as_ref()).await?;

        let mut keys: Vec<String> = listing
            .common_prefixes
            .iter()
            .map(|dir| format!("{dir}{DIR_DELIM}"))
            .chain(listing.objects.iter().map(|m| m.location.to_string()))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = object_path(key)?;
        // Some backends treat deleting a missing object as success.
        self.store.head(&path).await?;
        self.store.delete(&path).await?;
        log::debug!("Deleted {}/{key}", self.name);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = object_path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
