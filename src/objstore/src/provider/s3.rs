use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;

use super::{BackendKind, BucketProvider};
use crate::error::{ObjStoreError, Result};
use crate::{Bucket, ObjectStoreBucket};

/// Real AWS S3 buckets in one region.
///
/// Credentials are taken from the standard AWS environment, both for the
/// bucket management client and for the object operations.
#[derive(Debug, Clone)]
pub struct S3Provider {
    client: Client,
    region: String,
}

impl S3Provider {
    pub async fn from_env(region: impl Into<String>) -> Self {
        let region = region.into();
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        Self {
            client: Client::new(&config),
            region,
        }
    }

    fn object_store(&self, name: &str) -> Result<Arc<dyn ObjectStore>> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(name)
            .with_region(&self.region)
            .build()?;
        Ok(Arc::new(store))
    }
}

#[async_trait]
impl BucketProvider for S3Provider {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    async fn create_named(&self, name: &str) -> Result<Arc<dyn Bucket>> {
        let mut request = self.client.create_bucket().bucket(name);
        // us-east-1 is the implicit location and must not be sent explicitly.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        request.send().await.map_err(|e| {
            if e.as_service_error().is_some_and(bucket_taken) {
                ObjStoreError::BucketExists(name.to_string())
            } else {
                ObjStoreError::Provision {
                    bucket: name.to_string(),
                    reason: DisplayErrorContext(&e).to_string(),
                }
            }
        })?;
        log::info!("Created S3 bucket {name} in {}", self.region);

        Ok(Arc::new(ObjectStoreBucket::new(name, self.object_store(name)?)))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let removed = super::empty_store(self.object_store(name)?.as_ref()).await?;

        self.client
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| ObjStoreError::Provision {
                bucket: name.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        log::info!("Removed S3 bucket {name} with {removed} objects");
        Ok(())
    }
}

fn bucket_taken(err: &CreateBucketError) -> bool {
    err.is_bucket_already_exists() || err.is_bucket_already_owned_by_you()
}
