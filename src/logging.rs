//! Structured logging setup.
//!
//! Every module logs through the `tracing` facade installed here; nothing in the
//! crate writes to stdout/stderr directly once this has run.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `level` is the default filter used when
/// `RUST_LOG` is not set in the environment; `RUST_LOG` always wins when present.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already initialized (e.g. a previous test in the same process); not fatal.
        tracing::debug!("tracing subscriber already installed");
    }
}
