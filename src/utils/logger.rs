//! Logging initialization and configuration.
//!
//! By default logs go to stderr so they never mix with the command output
//! printed on stdout. With a log directory they go to a fresh timestamped
//! file instead, written through a non-blocking appender.
//!
//! # Configuration
//!
//! The log level can be controlled via the `RUST_LOG` environment variable:
//! - `RUST_LOG=debug` - Show process lifecycle details
//! - `RUST_LOG=info` - Show info and higher level logs (default)
//! - `RUST_LOG=warn` - Show timeouts and errors only
//! - `RUST_LOG=shell_reader=trace` - Everything, including swallowed cleanup errors

use std::fs;
use std::path::Path;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system.
///
/// With `log_dir` set, each run creates a new file such as
/// `logs/shell-reader.2024-12-06-14-30-25.log`. The returned guard flushes
/// the background writer when dropped, so keep it alive until exit. If the
/// directory or file cannot be created, logging falls back to stderr.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Default to "info" level if RUST_LOG is not set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(dir) = log_dir {
        match open_log_file(dir) {
            Ok((file, path)) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                let file_layer = fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false) // No ANSI colors in log files
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(file_layer)
                    .init();

                tracing::info!("Logging initialized - writing to {}", path.display());
                return Some(guard);
            }
            Err(e) => {
                eprintln!("Warning: Failed to open log file in {}: {}", dir.display(), e);
            }
        }
    }

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();

    None
}

fn open_log_file(dir: &Path) -> std::io::Result<(fs::File, std::path::PathBuf)> {
    fs::create_dir_all(dir)?;

    // Format: shell-reader.2024-12-06-14-30-25.log
    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    let path = dir.join(format!("shell-reader.{}.log", timestamp));
    let file = fs::File::create(&path)?;
    Ok((file, path))
}
