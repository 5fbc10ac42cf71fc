//! Process-wide tracing subscriber setup.

use crate::config::LogFormat;

/// Initialize logging to stdout.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this more
/// than once is a no-op, so tests and embedders can call it freely.
pub fn init_logging(format: LogFormat) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Text => registry.with(fmt::layer()).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    if result.is_err() {
        tracing::debug!("Global tracing subscriber already set");
    }
}
