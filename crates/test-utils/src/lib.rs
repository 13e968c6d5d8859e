//! Shared helpers for `flowdag` tests: tracing setup and TOML builders for
//! nodes and flow documents.

pub mod builders;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests, once per test binary.
///
/// Output goes through the test writer, so it is only shown for failing
/// tests (or with `-- --nocapture`). The filter comes from `RUST_LOG` and
/// defaults to `flowdag=debug`, which makes validation errors and warnings
/// visible next to a failing assertion.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("flowdag=debug"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}
