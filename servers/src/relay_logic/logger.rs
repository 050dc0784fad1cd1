use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// # Setup Logging
///
/// Installs the global `tracing` subscriber:
/// - human-readable console output with targets and ANSI colors;
/// - JSON lines in a daily rotating file under `log_dir`, named after `file_prefix`.
///
/// `RUST_LOG` takes precedence over `log_level`. The returned guard flushes the
/// file writer when dropped, so keep it alive until the process exits.
pub fn setup_logging(log_dir: &Path, log_level: &str, file_prefix: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = rolling::daily(log_dir, file_prefix);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level {log_level:?}"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("installing the tracing subscriber")?;

    tracing::info!("Logging initialized with level: {}", log_level);
    Ok(guard)
}
