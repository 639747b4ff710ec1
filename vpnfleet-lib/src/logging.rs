//! `tracing-subscriber` wiring, grounded in `gnosis_vpn-lib/src/logging.rs`
//! (simplified: no reload layer, no file sink — stdout only) (§9.2).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` controls verbosity; defaults
/// to `info` when unset or invalid.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}
