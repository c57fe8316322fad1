use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directory for the rolling JSON log files
pub const LOG_DIR: &str = "logs";

/// Filter used when `RUST_LOG` is unset, empty or unparseable
pub const DEFAULT_DIRECTIVES: &str = "hpc_export=info,security=info";

/// Initializes the logging system with both console and file output.
///
/// Console output goes to stderr so CSV written to stdout stays clean.
/// `RUST_LOG` replaces the default `hpc_export=info,security=info`; security
/// events use the `security` target.
pub fn init_logging() {
    // Ensure logs directory exists
    let _ = fs::create_dir_all(LOG_DIR);

    // Create a non-blocking file appender for daily log rotation
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, "hpc_export.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Create a JSON layer for file logging
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    // Create a formatted layer for console logging
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    // Set the global default subscriber
    tracing_subscriber::registry()
        .with(env_filter(rust_log.as_deref()))
        .with(file_layer)
        .with(console_layer)
        .init();

    // We need to keep the guard in scope to ensure logs are flushed on exit
    std::mem::forget(_guard);
}

fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVES))
}
