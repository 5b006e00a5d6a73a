pub mod helpers;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Route tracing output through the test harness so it only shows for failing tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}
