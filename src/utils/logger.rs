use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Installs a global `tracing` subscriber for the runtime.
///
/// The filter is read from `JITRT_LOG`, then `RUST_LOG`, and defaults to
/// `warn`. Calling this more than once, or after another subscriber was
/// installed, is a no-op.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = std::env::var("JITRT_LOG")
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("warn"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init();
    });
}
