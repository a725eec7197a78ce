use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt::time::LocalTime};

/// Install the tracing subscriber once per test binary. Output goes through
/// the test harness, so it only shows for failing tests or with `--nocapture`.
pub fn tracing_subscriber_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tordl=info"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_timer(LocalTime::rfc_3339())
            .with_test_writer()
            .try_init()
            .ok();
    });
}
