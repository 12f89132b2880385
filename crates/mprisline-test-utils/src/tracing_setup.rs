//! Tracing initialisation for tests that are not wrapped in `test_log::test`.
//!
//! The subscriber is installed at most once per process, so every test may
//! call [`init_test_tracing`].

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: protocol crates at debug, the rest
/// at info.
pub const DEFAULT_TEST_FILTER: &str = "info,mprisline_core=debug,mprisline_dbus=debug";

/// Send events to the test-harness writer, honouring `RUST_LOG`.
///
/// # Example
///
/// ```ignore
/// #[tokio::test]
/// async fn my_test() {
///     mprisline_test_utils::init_test_tracing();
///     tracing::debug!("captured per test");
/// }
/// ```
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
