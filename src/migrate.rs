use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::time::now_ms;
use crate::{AppError, AppResult};
use tracing::{error, info};

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    match trimmed.char_indices().nth(160) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202610010900_legacy_tables.sql",
        include_str!("../migrations/202610010900_legacy_tables.sql"),
    ),
    (
        "202610010930_new_schema.sql",
        include_str!("../migrations/202610010930_new_schema.sql"),
    ),
    (
        "202610011000_old_user_system_id.sql",
        include_str!("../migrations/202610011000_old_user_system_id.sql"),
    ),
];

/// Versions in the order they are applied.
pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|(name, _)| *name)
}

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

fn migration_error(filename: &str) -> impl Fn(sqlx::Error) -> AppError + '_ {
    move |err| AppError::from(err).with_context("migration", filename)
}

/// Applies every pending schema file, recording each in `schema_migrations`.
///
/// An already applied file whose contents changed aborts the run.
pub async fn apply_migrations(pool: &SqlitePool) -> AppResult<usize> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await
    .map_err(migration_error("schema_migrations"))?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(migration_error("schema_migrations"))?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    // Legacy databases may already carry columns a later file adds.
    let add_col_re = Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)")
        .map_err(|err| AppError::new("MIGRATION/REGEX", err.to_string()))?;

    let mut applied_now = 0;
    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = strip_comments(raw_sql);
        let checksum = checksum(&cleaned);

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                return Err(AppError::new(
                    "MIGRATION/EDITED",
                    "Migration edited after application.",
                )
                .with_context("migration", *filename));
            }
            info!(target: "sysmigrate", event = "migration_skip_file", file = %filename);
            continue;
        }

        let on_err = migration_error(filename);
        let mut tx = pool.begin().await.map_err(&on_err)?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            let upper = s.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            if let Some(caps) = add_col_re.captures(s) {
                if let (Some(table), Some(col)) = (caps.get(1), caps.get(2)) {
                    let exists: Option<i64> = sqlx::query_scalar(
                        "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
                    )
                    .bind(table.as_str())
                    .bind(col.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(&on_err)?;
                    if exists.is_some() {
                        info!(target: "sysmigrate", event = "migration_stmt_skip", file = %filename, sql = %preview(s));
                        continue;
                    }
                }
            }
            info!(target: "sysmigrate", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "sysmigrate", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(on_err(e));
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await
        .map_err(&on_err)?;

        tx.commit().await.map_err(&on_err)?;
        applied_now += 1;
        info!(target: "sysmigrate", event = "migration_file_applied", file = %filename);
    }

    Ok(applied_now)
}
