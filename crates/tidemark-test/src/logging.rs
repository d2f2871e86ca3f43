//! Test logging

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a global `tracing` subscriber writing through the test harness.
///
/// The filter comes from `RUST_LOG` and defaults to debug output of the tidemark crates.
/// Only the first call has an effect.
pub fn init_test_logging() {
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| EnvFilter::new("tidemark_db=debug,tidemark=debug"));
		let _ = tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_test_writer()
			.try_init();
	});
}
