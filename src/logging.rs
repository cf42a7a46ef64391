use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::{AppError, AppResult};

pub const LOG_ENV: &str = "SYSMIGRATE_LOG";
pub const DEFAULT_FILTER: &str = "sysmigrate=info,sqlx=warn";
pub const LOG_FILE_PREFIX: &str = "sysmigrate.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs JSON logging on stderr, plus a daily file under `log_dir` when given.
///
/// Keep the returned guard alive until exit or buffered file lines are lost.
/// Calling this twice leaves the first subscriber in place.
pub fn init(log_dir: Option<&Path>) -> AppResult<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .try_init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_log_dir")
            .with_context("path", dir.display().to_string())
    })?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr.and(file_writer))
        .try_init();
    Ok(Some(guard))
}
