//! Logging configuration using tracing
//!
//! Structured logging to stderr, filtered by the `RUST_LOG` environment variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: batch progress visible, dependencies quiet
pub const DEFAULT_FILTER: &str = "chatport=info,warn";

/// Initialize the tracing subscriber
///
/// # Example RUST_LOG values
/// - `RUST_LOG=debug` - Show debug and above everywhere
/// - `RUST_LOG=chatport=trace` - Trace level for this crate only
/// - `RUST_LOG=chatport::dispatch=debug,blockkit=info` - Per module
///
/// # Errors
/// Returns an error if the subscriber has already been initialized
pub fn init() -> crate::Result<()> {
    init_with(DEFAULT_FILTER, false)
}

/// Initialize with an explicit default filter; `verbose` adds source locations
pub fn init_with(default_filter: &str, verbose: bool) -> crate::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_thread_ids(verbose)
                .with_line_number(verbose),
        )
        .try_init()
        .map_err(|e| crate::MigrateError::Other(format!("Failed to initialize tracing: {}", e)))?;

    Ok(())
}

/// Initialize logging for tests (no-op if already initialized)
pub fn init_test() {
    let _ = init_with("chatport=debug", true);
}
