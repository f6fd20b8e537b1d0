//! Tracing setup: stderr plus a daily rolling log file.

use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default log directory ($XDG_DATA_HOME/gpcache/logs).
pub fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("gpcache").join("logs"))
}

/// Initialize the tracing subscriber.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=gpcache=debug). The
/// returned guard flushes the file writer and must live until exit.
pub fn init(log_dir: Option<PathBuf>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = fmt::layer().with_writer(io::stderr);

  let Some(dir) = log_dir else {
    tracing_subscriber::registry()
      .with(stderr)
      .with(filter)
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  };

  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
  let appender = tracing_appender::rolling::daily(&dir, "gpcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(stderr)
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .with(filter)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}
