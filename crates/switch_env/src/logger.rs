//!
//! Logging subsystem. Thin layer over `tracing`: components log through the
//! re-exported macros, hosts call [`setup`] once at startup.
//!

pub use tracing::{debug, error, event, info, instrument, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber with an env-filter (`RUST_LOG` wins over
/// `default_directive`) and a compact fmt layer.
///
/// Safe to call more than once; only the first call installs.
pub fn setup(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init();
}
