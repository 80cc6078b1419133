//! Tracing setup for binaries and tests embedding the engine

use std::sync::OnceLock;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, once per process.
///
/// Falls back to info level for the qualflow crates when `RUST_LOG` is unset or invalid. A subscriber
/// installed elsewhere wins.
pub fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("qualflow_core=info,qualflow_checkers=info"));
        let _ = fmt().with_env_filter(filter).with_target(true).try_init();
    });
}
