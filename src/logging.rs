//! Tracing setup for the CLI.

use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Install the global subscriber.
///
/// Logs always go to a daily file under `log_dir`; with `verbose` they are
/// also written to stderr. `RUST_LOG` overrides the default `shelfsync=info`
/// filter. Keep the returned guard alive until exit so buffered lines are
/// flushed.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(log_dir, "shelfsync.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new("shelfsync=info"))
    .map_err(|e| eyre!("Failed to create tracing filter: {}", e))?;

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(file_writer)
    .with_ansi(false)
    .with_target(true);

  let stderr_layer = verbose.then(|| {
    tracing_subscriber::fmt::layer()
      .compact()
      .with_writer(io::stderr)
      .with_target(false)
      .boxed()
  });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
