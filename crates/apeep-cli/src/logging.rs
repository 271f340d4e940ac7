use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the console logger and, when `log_dir` is given, a plain-text
/// copy of the log in `log_dir/log_<timestamp>.txt`.
///
/// The returned guard flushes the file when dropped; keep it alive for the
/// whole run.
pub fn init(debug: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(debug)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let name = chrono::Local::now()
                .format("log_%Y-%m-%d_%H-%M-%S.txt")
                .to_string();
            let path = dir.join(name);
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Logger initialization failed")?;
    Ok(guard)
}
