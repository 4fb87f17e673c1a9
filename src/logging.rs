//! Tracing subscriber setup for the command-line tool.

use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

const DEFAULT_DIRECTIVE: &str = "warn,starlist=info";

/// Install the global subscriber.
///
/// Logs go to stderr so stdout stays clean for listings. `RUST_LOG` takes
/// precedence over the configured level. When a log file is configured the
/// returned guard must be kept alive until exit to flush it.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let filter = match std::env::var("RUST_LOG") {
    Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
    _ => EnvFilter::try_new(config.level.as_deref().unwrap_or(DEFAULT_DIRECTIVE)),
  }
  .map_err(|e| Error::Config(format!("Invalid log level: {}", e)))?;

  let stderr_layer = tracing_subscriber::fmt::layer()
    .compact()
    .with_writer(io::stderr)
    .with_target(false);

  let (file_layer, guard) = match &config.file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Invalid log file path: {}", path.display())))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| Error::Config(format!("Failed to create log directory: {}", e)))?;

      let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, name));
      let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;

  Ok(guard)
}
