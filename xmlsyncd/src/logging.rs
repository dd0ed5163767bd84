use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{self, InitError, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_FILE_PREFIX: &str = "xmlsyncd";
pub const LOG_FILES_KEPT: usize = 5;

/// Installs the global subscriber: stderr always, plus a rotating file in
/// `log_dir` when one is given. `RUST_LOG` wins over `verbose`.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file, guard, file_error) = match log_dir.map(file_writer) {
        Some(Ok((writer, guard))) => (Some(writer), Some(guard), None),
        Some(Err(err)) => (None, None, Some(err)),
        None => (None, None, None),
    };
    let file_layer = file.map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(file_layer)
        .try_init();

    if let (Some(dir), Some(err)) = (log_dir, file_error) {
        tracing::warn!(dir = %dir.display(), error = %err, "file logging disabled");
    }
    guard
}

/// Daily-rotated `xmlsyncd.<date>.log` files in `dir`, oldest pruned past
/// [`LOG_FILES_KEPT`]. Writes go through a background thread.
pub fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard), InitError> {
    let appender = rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}
