use object_store::{
    ObjectStore, aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder, local::LocalFileSystem,
    memory::InMemory, path::Path, prefix::PrefixStore,
};
use std::sync::Arc;
use url::Url;

use common::BucketConfig;

use crate::error::{ObjStoreError, Result};
use crate::{Bucket, ObjectStoreBucket};

/// Create a bucket from configuration
pub fn create_bucket(config: &BucketConfig) -> Result<Arc<dyn Bucket>> {
    create_bucket_from_dsn(&config.dsn)
}

/// Create a bucket from a DSN string
///
/// Supported schemes: `memory://`, `file:///path`,
/// `s3://[access_key:secret_key@]host[:port]/bucket` and `gs://bucket[/prefix]`.
pub fn create_bucket_from_dsn(dsn: &str) -> Result<Arc<dyn Bucket>> {
    let url = Url::parse(dsn)
        .map_err(|e| ObjStoreError::InvalidConfig(format!("Invalid storage DSN '{dsn}': {e}")))?;

    let bucket = match url.scheme() {
        "file" => {
            let path = url.path();
            if path.is_empty() || path == "/" {
                return Err(ObjStoreError::InvalidConfig(
                    "File DSN must specify a path: file:///path/to/storage".to_string(),
                ));
            }
            let store = LocalFileSystem::new_with_prefix(path)?;
            ObjectStoreBucket::new(path, Arc::new(store))
        }
        "memory" => ObjectStoreBucket::new("memory", Arc::new(InMemory::new())),
        "s3" => {
            let (name, builder) = create_s3_builder_from_dsn(&url)?;
            ObjectStoreBucket::new(name, Arc::new(builder.build()?))
        }
        "gs" => {
            let Some(name) = url.host_str() else {
                return Err(ObjStoreError::InvalidConfig(
                    "GCS DSN must specify a bucket: gs://bucket".to_string(),
                ));
            };
            let store = GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(name)
                .build()?;
            let prefix = url.path().trim_matches('/');
            let store: Arc<dyn ObjectStore> = if prefix.is_empty() {
                Arc::new(store)
            } else {
                Arc::new(PrefixStore::new(store, Path::from(prefix)))
            };
            ObjectStoreBucket::new(name, store)
        }
        scheme => {
            return Err(ObjStoreError::InvalidConfig(format!(
                "Unsupported storage scheme: {scheme}. Supported: file, memory, s3, gs"
            )));
        }
    };

    log::info!("Using {} bucket '{}'", url.scheme(), bucket.name());
    Ok(Arc::new(bucket))
}

/// Create an S3 builder from a DSN, returning the bucket name with it
/// DSN format: s3://[access_key:secret_key@]host[:port]/bucket
pub fn create_s3_builder_from_dsn(dsn: &Url) -> Result<(String, AmazonS3Builder)> {
    let host = dsn
        .host_str()
        .ok_or_else(|| ObjStoreError::InvalidConfig("Missing S3 host in DSN".to_string()))?;
    let port = dsn.port();
    let bucket = dsn.path().trim_start_matches('/');

    if bucket.is_empty() {
        return Err(ObjStoreError::InvalidConfig(
            "S3 DSN must specify a bucket: s3://host/bucket".to_string(),
        ));
    }

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(bucket)
        .with_region("us-east-1"); // Default region

    // Extract credentials from DSN if present
    let access_key = dsn.username();
    let secret_key = dsn.password().unwrap_or("");

    if !access_key.is_empty() {
        builder = builder
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key);
    }

    // Real S3 needs no custom endpoint, S3-compatible stores (MinIO etc.) do
    let endpoint = if host.contains("amazonaws.com") {
        None
    } else {
        let scheme = if port == Some(443) { "https" } else { "http" };
        Some(match port {
            Some(p) => format!("{scheme}://{host}:{p}"),
            None => format!("{scheme}://{host}"),
        })
    };

    if let Some(endpoint) = endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(false); // MinIO requires path-style URLs
    }

    // Check environment for AWS credentials if not in DSN
    if access_key.is_empty() {
        if let Ok(env_key) = std::env::var("AWS_ACCESS_KEY_ID") {
            builder = builder.with_access_key_id(env_key);
        }
        if let Ok(env_secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            builder = builder.with_secret_access_key(env_secret);
        }
        if let Ok(env_region) = std::env::var("AWS_DEFAULT_REGION") {
            builder = builder.with_region(env_region);
        }
    }

    Ok((bucket.to_string(), builder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_create_memory_bucket() {
        let bucket = create_bucket_from_dsn("memory://").unwrap();
        assert_eq!(bucket.name(), "memory");

        bucket.put("obj", Bytes::from_static(b"1")).await.unwrap();
        assert!(bucket.exists("obj").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_filesystem_bucket() {
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_string_lossy();
        let dsn = format!("file://{path}");

        let bucket = create_bucket_from_dsn(&dsn).unwrap();
        bucket
            .put("dir/obj", Bytes::from_static(b"data"))
            .await
            .unwrap();
        assert_eq!(bucket.list("dir/").await.unwrap(), vec!["dir/obj"]);
        assert!(temp_dir.path().join("dir").join("obj").exists());
    }

    #[test]
    fn test_create_bucket_from_config() {
        let config = BucketConfig {
            dsn: "memory://".to_string(),
        };

        let bucket = create_bucket(&config).unwrap();
        assert!(Arc::strong_count(&bucket) == 1);
    }

    #[test]
    fn test_invalid_dsn() {
        let result = create_bucket_from_dsn("not-a-url");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid storage DSN")
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = create_bucket_from_dsn("azure://container/prefix");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Unsupported storage scheme")
        );
    }

    #[test]
    fn test_s3_dsn_parsing() {
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://mybucket.s3.amazonaws.com/prefix").unwrap(),
        );
        assert_eq!(result.unwrap().0, "prefix");

        // S3-compatible DSN with credentials
        let result = create_s3_builder_from_dsn(
            &Url::parse("s3://access:secret@localhost:9000/bucket").unwrap(),
        );
        assert_eq!(result.unwrap().0, "bucket");

        let result = create_s3_builder_from_dsn(&Url::parse("s3://localhost:9000/").unwrap());
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must specify a bucket")
        );
    }

    #[test]
    fn test_file_dsn_without_path() {
        let result = create_bucket_from_dsn("file://");
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("File DSN must specify a path")
        );
    }
}
