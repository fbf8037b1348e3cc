use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Role a store instance plays for the query fanout layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Query,
    #[default]
    Rule,
    Sidecar,
    Store,
    Receive,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Rule => write!(f, "rule"),
            Self::Sidecar => write!(f, "sidecar"),
            Self::Store => write!(f, "store"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Configuration of the StoreAPI adapter in front of a local TSDB
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct StoreConfig {
    /// Role advertised through Info
    pub store_type: StoreKind,
    /// Labels attached to every series this store exposes
    pub external_labels: BTreeMap<String, String>,
    /// Lower bound of the advertised time range (milliseconds), 0 when unset
    pub min_time: Option<i64>,
    /// Upper bound of the advertised time range (milliseconds), i64::MAX when unset
    pub max_time: Option<i64>,
}

/// Object storage bucket selection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BucketConfig {
    /// memory://, file:///path, s3://[key:secret@]host[:port]/bucket or gs://bucket[/prefix]
    pub dsn: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("memory://"),
        }
    }
}

/// Settings for the object storage conformance harness
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    /// How long leaked tasks or bucket handles may linger after a backend run
    #[serde(with = "humantime_serde")]
    pub leak_timeout: Duration,
    /// Region used when provisioning S3 test buckets
    pub s3_region: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            leak_timeout: Duration::from_secs(10),
            s3_region: "eu-west-1".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Configuration {
    /// StoreAPI adapter configuration
    pub store: StoreConfig,
    /// Object storage configuration
    pub bucket: BucketConfig,
    /// Conformance harness configuration
    pub harness: HarnessConfig,
}

impl Configuration {
    /// Load configuration from defaults, `tsdb-gateway.toml` and
    /// `TSDB_GATEWAY__` prefixed environment variables, in that order.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment().extract().map_err(Box::new)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file("tsdb-gateway.toml"))
            .merge(Env::prefixed("TSDB_GATEWAY__").split("__"))
    }
}
