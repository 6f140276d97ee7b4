use anyhow::{Context, Result};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Opens the debug log for appending, creating it and its parent directory if needed.
pub fn open_debug_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open debug log {}", path.display()))
}

/// Installs the process-wide subscriber: console output filtered by `RUST_LOG`
/// (default `info`), plus a debug-level copy into `debug_log` when given.
pub fn init(debug_log: Option<&Path>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(env_filter);

    let file_layer = match debug_log {
        Some(path) => {
            let file = open_debug_log(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

/// Reports an error that ends the run. The console layer is the only place it is
/// printed.
pub fn report_fatal(mode: impl fmt::Display, err: &anyhow::Error) {
    tracing::error!("{err:#}");
    tracing::info!("{mode} aborted");
}
