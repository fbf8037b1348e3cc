//! Store API adapter over a local time series database.
//!
//! [`TsdbStore`] answers Info, LabelNames, LabelValues and Series calls from
//! any [`tsdb::Queryable`], streaming series as XOR encoded chunks.

pub mod chunkenc;
pub mod error;
pub mod labels;
pub mod storepb;
pub mod tsdb;
pub mod tsdb_store;

pub use error::StoreError;
pub use labels::{Label, Labels, Matcher, MatcherOp};
pub use storepb::Store;
pub use tsdb::{Querier, Queryable, TsdbError};
pub use tsdb_store::{SeriesStream, TsdbStore};
