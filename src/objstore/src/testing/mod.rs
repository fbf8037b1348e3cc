//! Conformance harness running one test suite against every bucket backend.
//!
//! ```rust,ignore
//! use objstore::testing::{acceptance, foreach_store};
//!
//! #[tokio::test]
//! async fn test_bucket_conformance() {
//!     foreach_store(acceptance::run).await.assert_ok();
//! }
//! ```
//!
//! The in-memory backend always runs. GCS runs when `GCP_PROJECT` is set
//! (its value names the project, `GCS_BUCKET` may name the root bucket) and
//! AWS S3 runs when `S3_BUCKET` is set (`S3_REGION` overrides the region).
//! Each run gets a fresh randomly named bucket which is removed afterwards,
//! whatever the outcome.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::testing::LeakCheck;
use common::{Configuration, HarnessConfig};
use uuid::Uuid;

use crate::Bucket;
use crate::provider::{BackendKind, BucketProvider, GcsProvider, InMemoryProvider, S3Provider};

pub mod acceptance;

pub const GCP_PROJECT_ENV: &str = "GCP_PROJECT";
pub const GCS_BUCKET_ENV: &str = "GCS_BUCKET";
pub const S3_BUCKET_ENV: &str = "S3_BUCKET";
pub const S3_REGION_ENV: &str = "S3_REGION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

/// Per-backend outcomes of one [`Harness::run`], in execution order.
#[derive(Debug, Default)]
pub struct ForeachReport {
    runs: Vec<(BackendKind, Outcome)>,
}

impl ForeachReport {
    pub fn runs(&self) -> &[(BackendKind, Outcome)] {
        &self.runs
    }

    pub fn outcome(&self, kind: BackendKind) -> Option<&Outcome> {
        self.runs.iter().find(|(k, _)| *k == kind).map(|(_, o)| o)
    }

    pub fn passed(&self) -> Vec<BackendKind> {
        self.filter(|o| matches!(o, Outcome::Passed))
    }

    pub fn skipped(&self) -> Vec<BackendKind> {
        self.filter(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> Vec<BackendKind> {
        self.filter(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// Panic with every failure reason if any backend failed.
    pub fn assert_ok(&self) {
        let failures: Vec<String> = self
            .runs
            .iter()
            .filter_map(|(kind, outcome)| match outcome {
                Outcome::Failed(reason) => Some(format!("{kind}: {reason}")),
                _ => None,
            })
            .collect();
        assert!(failures.is_empty(), "backend failures: {failures:#?}");
    }

    fn filter(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<BackendKind> {
        self.runs
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(k, _)| *k)
            .collect()
    }

    fn record(&mut self, kind: BackendKind, outcome: Outcome) {
        match &outcome {
            Outcome::Passed => log::info!("{kind}: passed"),
            Outcome::Failed(reason) => log::error!("{kind}: failed: {reason}"),
            Outcome::Skipped(reason) => log::info!("{kind}: skipped: {reason}"),
        }
        self.runs.push((kind, outcome));
    }
}

enum OptionalBackend {
    Available(Box<dyn BucketProvider>),
    Skipped { kind: BackendKind, reason: String },
}

/// Sequential driver over one mandatory and any number of optional backends.
pub struct Harness {
    leak_timeout: Duration,
    mandatory: Box<dyn BucketProvider>,
    optional: Vec<OptionalBackend>,
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let optional: Vec<String> = self
            .optional
            .iter()
            .map(|b| match b {
                OptionalBackend::Available(p) => p.kind().to_string(),
                OptionalBackend::Skipped { kind, .. } => format!("{kind} (skipped)"),
            })
            .collect();
        f.debug_struct("Harness")
            .field("leak_timeout", &self.leak_timeout)
            .field("mandatory", &self.mandatory.kind())
            .field("optional", &optional)
            .finish()
    }
}

impl Harness {
    pub fn new(mandatory: Box<dyn BucketProvider>) -> Self {
        Self {
            leak_timeout: HarnessConfig::default().leak_timeout,
            mandatory,
            optional: Vec::new(),
        }
    }

    /// In-memory plus whichever cloud backends the environment enables.
    pub async fn from_env(config: &HarnessConfig) -> Self {
        let mut harness =
            Self::new(Box::new(InMemoryProvider::new())).with_leak_timeout(config.leak_timeout);

        harness = match std::env::var(GCP_PROJECT_ENV) {
            Ok(project) => {
                let root_bucket = std::env::var(GCS_BUCKET_ENV).ok();
                harness.with_optional(Box::new(GcsProvider::for_project(project, root_bucket)))
            }
            Err(_) => harness.with_skipped(
                BackendKind::Gcs,
                format!("No {GCP_PROJECT_ENV} envvar. Skipping test against GCS"),
            ),
        };

        harness = if std::env::var_os(S3_BUCKET_ENV).is_some() {
            let region = std::env::var(S3_REGION_ENV).ok();
            let region = region.unwrap_or_else(|| config.s3_region.clone());
            harness.with_optional(Box::new(S3Provider::from_env(region).await))
        } else {
            harness.with_skipped(
                BackendKind::S3,
                format!("No {S3_BUCKET_ENV} envvar. Skipping test against AWS S3"),
            )
        };

        harness
    }

    pub fn with_leak_timeout(mut self, leak_timeout: Duration) -> Self {
        self.leak_timeout = leak_timeout;
        self
    }

    pub fn with_optional(mut self, provider: Box<dyn BucketProvider>) -> Self {
        self.optional.push(OptionalBackend::Available(provider));
        self
    }

    pub fn with_skipped(mut self, kind: BackendKind, reason: impl Into<String>) -> Self {
        self.optional.push(OptionalBackend::Skipped {
            kind,
            reason: reason.into(),
        });
        self
    }

    /// Run `test_fn` once per backend, each time with a fresh bucket.
    ///
    /// A failure of the mandatory backend stops the run; failures of optional
    /// backends are recorded and the next backend still runs.
    pub async fn run<F, Fut>(&self, test_fn: F) -> ForeachReport
    where
        F: Fn(Arc<dyn Bucket>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut report = ForeachReport::default();

        let outcome = run_backend(self.mandatory.as_ref(), self.leak_timeout, &test_fn).await;
        let mandatory_failed = matches!(outcome, Outcome::Failed(_));
        report.record(self.mandatory.kind(), outcome);
        if mandatory_failed {
            return report;
        }

        for backend in &self.optional {
            match backend {
                OptionalBackend::Available(provider) => {
                    let provider = provider.as_ref();
                    let outcome = run_backend(provider, self.leak_timeout, &test_fn).await;
                    report.record(provider.kind(), outcome);
                }
                OptionalBackend::Skipped { kind, reason } => {
                    report.record(*kind, Outcome::Skipped(reason.clone()));
                }
            }
        }

        report
    }
}

/// Run `test_fn` against every available backend, configured from the
/// environment and the harness section of the configuration.
pub async fn foreach_store<F, Fut>(test_fn: F) -> ForeachReport
where
    F: Fn(Arc<dyn Bucket>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let config = match Configuration::load() {
        Ok(config) => config.harness,
        Err(e) => {
            log::warn!("Invalid harness configuration, using defaults: {e}");
            HarnessConfig::default()
        }
    };
    Harness::from_env(&config).await.run(test_fn).await
}

pub fn random_bucket_name() -> String {
    format!("objstore-test-{}", Uuid::new_v4().simple())
}

async fn run_backend<F, Fut>(
    provider: &dyn BucketProvider,
    leak_timeout: Duration,
    test_fn: &F,
) -> Outcome
where
    F: Fn(Arc<dyn Bucket>) -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let kind = provider.kind();
    let name = random_bucket_name();

    let bucket = match provider.create_named(&name).await {
        Ok(bucket) => bucket,
        Err(e) => return Outcome::Failed(format!("provisioning bucket {name}: {e}")),
    };
    log::info!("{kind}: running against bucket {name}");

    let mut leaks = LeakCheck::start();
    leaks.track(format!("bucket {name}"), &bucket);

    let suite = match tokio::spawn(test_fn(bucket)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(e) if e.is_panic() => Err(format!("panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Err(format!("suite task failed: {e}")),
    };
    let leaked = leaks.check_timeout(leak_timeout).await;

    let teardown = provider.remove(&name).await;

    let mut problems = Vec::new();
    if let Err(reason) = suite {
        problems.push(reason);
    }
    if let Err(e) = leaked {
        problems.push(format!("{e:#}"));
    }
    if let Err(e) = teardown {
        problems.push(format!("removing bucket {name}: {e}"));
    }

    if problems.is_empty() {
        Outcome::Passed
    } else {
        Outcome::Failed(problems.join("; "))
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
