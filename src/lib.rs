//! Store gateway for local time series databases.
//!
//! - [`store`]: the store API adapter, chunk codec and local query interface
//! - [`objstore`]: bucket capability, backends and their conformance harness
//! - [`common`]: configuration shared by both

pub use common;
pub use objstore;
pub use store;

pub use common::Configuration;
pub use store::{Store, TsdbStore};
