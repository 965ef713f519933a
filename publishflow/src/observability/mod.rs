//! Process-wide logging setup.
//!
//! Stages log through `tracing` with `stage` and `node` fields. Libraries
//! never install a subscriber themselves; binaries and tests embedding the
//! pipeline call [`init_tracing`] once.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Installs a human-readable subscriber filtered by `RUST_LOG`, defaulting
/// to `info`.
pub fn init_tracing() {
    init_tracing_with(LogFormat::Pretty);
}

/// Installs a subscriber with the given format. Only the first call in a
/// process has any effect.
pub fn init_tracing_with(format: LogFormat) {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true);
        // Another subscriber may already be installed by the host.
        match format {
            LogFormat::Pretty => builder.try_init().ok(),
            LogFormat::Json => builder.json().try_init().ok(),
        };
    });
}
