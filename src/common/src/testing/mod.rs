//! Test utilities shared by the workspace crates.
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```

mod leak;

pub use leak::LeakCheck;

/// Initialize test logging for both `log` records and `tracing` events.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
    let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
