//! Tracing setup: filtered stderr output plus a daily log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// File name prefix inside the log directory.
pub const LOG_FILE_PREFIX: &str = "mailpilot.log";

/// Install the global subscriber.
///
/// `RUST_LOG` filters the console (default `info`); the file always gets
/// `debug` and above. Keep the returned guard alive for the life of the
/// process or buffered file output is lost.
pub fn init(log_dir: &Path) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let file = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(EnvFilter::new("mailpilot=debug,info"));

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(guard)
}
