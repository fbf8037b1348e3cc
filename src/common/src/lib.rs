pub mod config;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{BucketConfig, Configuration, HarnessConfig, StoreConfig, StoreKind};
