//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;

/// Build the filter: `RUST_LOG` when set, otherwise `log_level` for this crate
/// and `warn` for everything else.
pub fn env_filter(app: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,laser_level={}", app.log_level)))
}

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init(app: &ApplicationConfig, json: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(app));
    // A subscriber may already be set, e.g. by a test harness.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
