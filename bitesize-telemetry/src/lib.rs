//! Tracing initialization for the operator binaries.

use std::sync::Once;

use thiserror::Error;
use tracing::subscriber::{SetGlobalDefaultError, set_global_default};
use tracing_log::{LogTracer, log_tracer::SetLoggerError};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Errors that can occur during tracing initialization.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to init log tracer: {0}")]
    InitLogTracer(#[from] SetLoggerError),

    #[error("failed to set global default subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

/// Initializes the global tracing subscriber for the given binary.
///
/// Log lines from crates still using the `log` facade are bridged through
/// [`LogTracer`]. The filter honors `RUST_LOG` when set; otherwise the level
/// defaults to `info`, or `debug` when the `DEBUG` configuration flag is on.
pub fn init_tracing(name: &str, debug: bool) -> Result<(), TracingError> {
    LogTracer::init()?;

    let default_directive = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish();
    set_global_default(subscriber)?;

    tracing::info!(name, "tracing initialized");

    Ok(())
}

/// Initializes tracing for tests.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .finish();
        let _ = set_global_default(subscriber);
    });
}
