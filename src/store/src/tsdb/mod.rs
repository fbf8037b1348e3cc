//! Interface of the local time series database a store serves from.

#[cfg(any(test, feature = "testing"))]
pub mod mem;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chunkenc::Sample;
use crate::labels::{Labels, Matcher};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TsdbError {
    #[error("database is closed")]
    Closed,
    #[error("query cancelled")]
    Cancelled,
    /// Data of one block could not be read; other blocks may still answer.
    #[error("block {block} unreadable: {reason}")]
    BlockUnreadable { block: String, reason: String },
    #[error("out of order sample at {t} for series {series}")]
    OutOfOrder { series: String, t: i64 },
}

impl TsdbError {
    /// Whether the error affects only part of the queried data.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::BlockUnreadable { .. })
    }
}

/// Lazily evaluated samples of one series, ordered by timestamp.
pub type SampleIter = Box<dyn Iterator<Item = Result<Sample, TsdbError>> + Send>;

/// One series produced by a select.
pub struct SelectedSeries {
    pub labels: Labels,
    pub samples: SampleIter,
}

impl std::fmt::Debug for SelectedSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedSeries")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

/// Result of a select. Warnings describe data that could not be included.
#[derive(Debug, Default)]
pub struct SeriesSet {
    pub series: Vec<SelectedSeries>,
    pub warnings: Vec<String>,
}

/// Result of a label name or label value query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelQueryResult {
    pub values: Vec<String>,
    pub warnings: Vec<String>,
}

/// A database that can be queried over time ranges.
#[async_trait]
pub trait Queryable: Send + Sync {
    fn is_closed(&self) -> bool;

    /// Open a read view over `[mint, maxt]`, both inclusive. The view is
    /// released when dropped.
    async fn querier(
        &self,
        cancel: CancellationToken,
        mint: i64,
        maxt: i64,
    ) -> Result<Box<dyn Querier>, TsdbError>;
}

#[async_trait]
pub trait Querier: Send + Sync {
    /// Series matching all matchers, with samples limited to the view range.
    async fn select(&self, matchers: &[Matcher]) -> Result<SeriesSet, TsdbError>;

    /// Label names of series matching all matchers.
    async fn label_names(&self, matchers: &[Matcher]) -> Result<LabelQueryResult, TsdbError>;

    /// Values of `name` across series matching all matchers.
    async fn label_values(
        &self,
        name: &str,
        matchers: &[Matcher],
    ) -> Result<LabelQueryResult, TsdbError>;
}
