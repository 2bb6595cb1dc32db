use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub const LOG_FILE: &str = "flipmark.log";

/// Logs to stderr and appends to `<out_dir>/flipmark.log`. `RUST_LOG`
/// overrides the default `info` level.
pub fn init(out_dir: &Path) -> Result<PathBuf> {
    let path = out_dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("failed to install the log subscriber")?;

    Ok(path)
}
