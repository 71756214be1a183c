//! Logging setup
//!
//! Console logging with an env-driven filter. `RUST_LOG` wins when set,
//! otherwise everything logs at `info`.

use tracing_subscriber::EnvFilter;

pub fn init_logger() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .init();
}
