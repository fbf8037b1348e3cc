#[derive(Debug, thiserror::Error)]
pub enum ObjStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key '{key}': {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: object_store::path::Error,
    },
    #[error("bucket already exists: {0}")]
    BucketExists(String),
    #[error("invalid bucket configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to provision bucket '{bucket}': {reason}")]
    Provision { bucket: String, reason: String },
    #[error("object storage error: {0}")]
    Backend(#[source] object_store::Error),
}

impl ObjStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<object_store::Error> for ObjStoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObjStoreError>;
