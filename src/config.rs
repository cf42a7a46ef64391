use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::remote::http::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
use crate::{AppError, AppResult};

pub const DEFAULT_CONCURRENCY: usize = 1;
const APP_DIR: &str = "sysmigrate";
const DB_FILE: &str = "sysmigrate.sqlite3";

/// Flags for `sysmigrate run`. Every flag can also come from the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// SQLite database holding both the legacy and the new tables.
    #[arg(long, value_name = "PATH", env = "SYSMIGRATE_DB")]
    pub db: Option<PathBuf>,

    /// Base URL of the remote system API.
    #[arg(long, value_name = "URL", env = "SYSMIGRATE_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Per-request timeout for remote calls.
    #[arg(long, value_name = "SECS", env = "SYSMIGRATE_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Accounts processed at the same time.
    #[arg(long, value_name = "N", env = "SYSMIGRATE_CONCURRENCY")]
    pub concurrency: Option<i64>,

    /// Reconcile and report without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for daily log files in addition to stderr.
    #[arg(long, value_name = "PATH", env = "SYSMIGRATE_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrateConfig {
    pub db_path: PathBuf,
    pub remote_base_url: String,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub dry_run: bool,
    pub log_dir: Option<PathBuf>,
}

impl MigrateConfig {
    pub fn from_args(args: RunArgs) -> AppResult<Self> {
        let db_path = match args.db {
            Some(path) if path.as_os_str().is_empty() => {
                return Err(AppError::new("CONFIG/DB_PATH", "Database path is empty."));
            }
            Some(path) => path,
            None => default_db_path()?,
        };

        let remote_base_url = args
            .remote_url
            .map(|url| url.trim().to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(remote_base_url.starts_with("http://") || remote_base_url.starts_with("https://")) {
            return Err(
                AppError::new("CONFIG/REMOTE_URL", "Remote URL must be http(s).")
                    .with_context("value", remote_base_url),
            );
        }

        let request_timeout = match args.timeout_secs {
            Some(0) => {
                return Err(AppError::new(
                    "CONFIG/TIMEOUT",
                    "Request timeout must be at least one second.",
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIMEOUT,
        };

        let concurrency = match args.concurrency {
            None => DEFAULT_CONCURRENCY,
            Some(n) if n >= 1 => usize::try_from(n).map_err(|_| {
                AppError::new("CONFIG/CONCURRENCY", "Concurrency is too large.")
                    .with_context("value", n.to_string())
            })?,
            Some(n) => {
                return Err(
                    AppError::new("CONFIG/CONCURRENCY", "Concurrency must be at least 1.")
                        .with_context("value", n.to_string()),
                );
            }
        };

        Ok(Self {
            db_path,
            remote_base_url,
            request_timeout,
            concurrency,
            dry_run: args.dry_run,
            log_dir: args.log_dir,
        })
    }
}

pub fn default_db_path() -> AppResult<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|err| AppError::from(err).with_context("operation", "default_db_path"))?,
    };
    Ok(base.join(APP_DIR).join(DB_FILE))
}
