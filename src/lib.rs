use std::sync::Arc;

pub mod config;
pub mod db;
pub mod driver;
mod error;
pub mod field_type;
pub mod id;
pub mod legacy;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod slug;
pub mod time;
pub mod writer;

pub use error::{AppError, AppResult};

use config::MigrateConfig;
use driver::{MigrationDriver, MigrationReport};
use legacy::SqliteLegacyStore;
use remote::HttpFetcher;
use slug::RandomSlugs;
use writer::SqliteBatchWriter;

/// Opens the database, brings the schema up to date and migrates every
/// legacy account. Errors here are setup failures; per-account failures
/// are reported in the returned report.
pub async fn run(config: &MigrateConfig) -> AppResult<MigrationReport> {
    let max_connections = u32::try_from(config.concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    let pool = db::open_pool(&config.db_path, max_connections).await?;
    migrate::apply_migrations(&pool).await?;

    let fetcher = HttpFetcher::new(&config.remote_base_url, config.request_timeout)?;
    let driver = MigrationDriver::new(
        Arc::new(SqliteLegacyStore::new(pool.clone())),
        Arc::new(fetcher),
        Arc::new(RandomSlugs),
        Arc::new(SqliteBatchWriter::new(pool.clone())),
    )
    .with_concurrency(config.concurrency)
    .with_dry_run(config.dry_run);

    let report = driver.run().await;
    pool.close().await;
    report
}
