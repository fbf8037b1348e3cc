use std::sync::Arc;

use async_trait::async_trait;
use object_store::ObjectStore;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::prefix::PrefixStore;

use super::{BackendKind, BucketProvider};
use crate::error::{ObjStoreError, Result};
use crate::{Bucket, ObjectStoreBucket};

/// GCS test buckets, scoped by name inside one root bucket of a project.
///
/// The `object_store` GCS client has no bucket management API, so every
/// named bucket is an isolated key prefix of the root bucket.
#[derive(Debug, Clone)]
pub struct GcsProvider {
    project: String,
    root_bucket: String,
}

impl GcsProvider {
    pub fn new(project: impl Into<String>, root_bucket: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            root_bucket: root_bucket.into(),
        }
    }

    /// Root bucket derived from the project unless one is given explicitly.
    pub fn for_project(project: impl Into<String>, root_bucket: Option<String>) -> Self {
        let project = project.into();
        let root_bucket = root_bucket.unwrap_or_else(|| format!("{project}-objstore-test"));
        Self::new(project, root_bucket)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn root_bucket(&self) -> &str {
        &self.root_bucket
    }

    fn object_store(&self, name: &str) -> Result<Arc<dyn ObjectStore>> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&self.root_bucket)
            .build()?;
        Ok(Arc::new(PrefixStore::new(store, Path::from(name))))
    }
}

#[async_trait]
impl BucketProvider for GcsProvider {
    fn kind(&self) -> BackendKind {
        BackendKind::Gcs
    }

    async fn create_named(&self, name: &str) -> Result<Arc<dyn Bucket>> {
        let store = self.object_store(name)?;
        let listing = store.list_with_delimiter(None).await?;
        if !listing.objects.is_empty() || !listing.common_prefixes.is_empty() {
            return Err(ObjStoreError::BucketExists(format!("{}/{name}", self.root_bucket)));
        }
        let (root, project) = (&self.root_bucket, &self.project);
        log::info!("Using gs://{root}/{name} as bucket for project {project}");

        Ok(Arc::new(ObjectStoreBucket::new(name, store)))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let removed = super::empty_store(self.object_store(name)?.as_ref()).await?;
        let root = &self.root_bucket;
        log::info!("Removed gs://{root}/{name} with {removed} objects");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_bucket_from_project() {
        let provider = GcsProvider::for_project("my-project", None);
        assert_eq!(provider.root_bucket(), "my-project-objstore-test");
        assert_eq!(provider.project(), "my-project");

        let provider = GcsProvider::for_project("my-project", Some("shared".to_string()));
        assert_eq!(provider.root_bucket(), "shared");
        assert_eq!(provider.kind(), BackendKind::Gcs);
    }
}
