//! Logging and tracing configuration
//!
//! All diagnostics go to stderr so that stdout carries nothing but the
//! harness summary line.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
///
/// The `session-trace` feature turns on the per-step session trace.
pub fn default_filter() -> &'static str {
    if cfg!(feature = "session-trace") {
        "debugger_stress=debug,warn"
    } else {
        "debugger_stress=warn"
    }
}

/// Initialize tracing for the harness binary
///
/// Logs are controlled by the `RUST_LOG` environment variable. Thread names
/// are shown because every session runs on its own `session #N` thread.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
