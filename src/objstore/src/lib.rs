//! Object storage bucket capability and its backends.
//!
//! Every backend is exposed through the [`Bucket`] trait, a thin contract of
//! named-object operations. Concrete backends are built on the `object_store`
//! crate and selected at startup from a [`common::BucketConfig`] (see
//! [`storage::create_bucket`]). Bucket lifecycle for tests is handled by
//! [`provider::BucketProvider`] implementations.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

pub mod bucket;
pub mod error;
pub mod provider;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bucket::ObjectStoreBucket;
pub use error::{ObjStoreError, Result};
pub use provider::{BackendKind, BucketProvider};
pub use storage::create_bucket;

/// Separator between the directory levels of an object key.
pub const DIR_DELIM: &str = "/";

/// Named-object operations every bucket backend has to support.
#[async_trait]
pub trait Bucket: Send + Sync + fmt::Debug {
    /// Name of the bucket (or namespace) the operations act on.
    fn name(&self) -> &str;

    /// Upload `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read the whole object stored under `key`.
    ///
    /// Fails with [`ObjStoreError::NotFound`] if the object does not exist.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// List the direct children of the directory `prefix`.
    ///
    /// Objects are returned with their full key, sub-directories with a
    /// trailing [`DIR_DELIM`]. The result is sorted ascending. An empty
    /// prefix lists the bucket root.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove the object stored under `key`.
    ///
    /// Fails with [`ObjStoreError::NotFound`] if the object does not exist.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
