//! Tracing subscriber setup

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when `RUST_LOG` is not set
///
/// The meshtastic stream buffer logs every serial chunk at info level.
pub const DEFAULT_FILTER: &str = "info,meshtastic::connections::stream_buffer=warn";

/// Prefix of the daily log files
const LOG_FILE_PREFIX: &str = "meshtastic-pinger.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber: stdout, plus daily files in `log_dir`
///
/// The returned guard flushes the file writer when dropped, so keep it alive
/// for the life of the process.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stdout_layer = fmt::layer().with_target(false);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(env_filter())
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stdout_layer)
                .init();
            None
        }
    }
}
