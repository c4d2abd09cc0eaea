//! Global tracing subscriber.

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. `json` switches from compact text
/// to one JSON object per line. Calling twice is a no-op.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
