//! Diagnostics: console echo and the optional append-only log file.
//!
//! Both sinks are `tracing` layers. The console follows the requested
//! verbosity (or `RUST_LOG`); the log file always records info and above.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Timestamp layout used in the log file.
const TIMESTAMP_FORMAT: &str = "%Y-%b-%d, %H:%M:%S";

/// Install the global subscriber.
///
/// `console_level` is an `EnvFilter` directive used when `RUST_LOG` is not
/// set. When `log_file` is given, entries are appended to it.
pub fn init(console_level: &str, log_file: Option<&Path>) -> Result<()> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_level));
    // stderr keeps stdout free for whoever launched the agent
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file_layer = log_file
        .map(open_log_file)
        .transpose()?
        .map(|file| {
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
                .with_filter(LevelFilter::INFO)
        });

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create log folder {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Unable to write to the log file {}", path.display()))
}
