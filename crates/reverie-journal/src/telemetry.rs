//! Logging setup for binaries and test harnesses embedding the journal.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber (respects `RUST_LOG`). Call once at start-up
/// of the embedding process. Safe to call more than once; later calls are
/// no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,reverie_journal=debug")),
        )
        .with_test_writer()
        .try_init();
}
