//! Bucket lifecycle: creating and removing uniquely named buckets.
//!
//! Production code gets a single bucket from configuration. Tests that must
//! not share state (the conformance harness most of all) ask a provider for a
//! fresh bucket and remove it again afterwards.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Bucket;
use crate::error::Result;

mod gcs;
mod inmem;
mod s3;

pub use gcs::GcsProvider;
pub use inmem::InMemoryProvider;
pub use s3::S3Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    InMemory,
    Gcs,
    S3,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, "inmem"),
            Self::Gcs => write!(f, "gcs"),
            Self::S3 => write!(f, "aws s3"),
        }
    }
}

#[async_trait]
pub trait BucketProvider: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Create an empty bucket called `name`.
    ///
    /// Fails with [`crate::ObjStoreError::BucketExists`] when the name is taken.
    async fn create_named(&self, name: &str) -> Result<Arc<dyn Bucket>>;

    /// Delete every object in bucket `name` and the bucket itself.
    async fn remove(&self, name: &str) -> Result<()>;
}

/// Delete every object reachable from the root of `store`.
pub(crate) async fn empty_store(store: &dyn object_store::ObjectStore) -> Result<usize> {
    use futures::TryStreamExt;

    let locations: Vec<_> = store
        .list(None)
        .map_ok(|meta| meta.location)
        .try_collect()
        .await?;

    for location in &locations {
        store.delete(location).await?;
    }
    Ok(locations.len())
}
