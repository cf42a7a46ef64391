use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info, warn};

use crate::model::{OutputField, OutputMember, OutputSystem};
use crate::reconcile::AccountOutcome;
use crate::time::now_ms;
use crate::{AppError, AppResult};

/// Persists one account's output graph as a single atomic unit.
///
/// Implementations must accept ids that already exist, since identities are
/// stable across runs.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn commit(&self, outcome: &AccountOutcome) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct SqliteBatchWriter {
    pool: SqlitePool,
}

impl SqliteBatchWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchWriter for SqliteBatchWriter {
    async fn commit(&self, outcome: &AccountOutcome) -> AppResult<()> {
        let account_id = outcome.account.id.as_str();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| AppError::write_failure(account_id, err))?;

        match write_account(&mut tx, outcome, now_ms()).await {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|err| AppError::write_failure(account_id, err))?;
                info!(target: "sysmigrate", event = "db_tx_commit", account_id);
                Ok(())
            }
            Err(err) => {
                if let Err(rb) = tx.rollback().await {
                    error!(
                        target: "sysmigrate",
                        event = "db_tx_rollback_failed",
                        account_id,
                        error = %rb
                    );
                } else {
                    warn!(target: "sysmigrate", event = "db_tx_rollback", account_id);
                }
                Err(AppError::write_failure(account_id, err))
            }
        }
    }
}

async fn write_account(
    conn: &mut SqliteConnection,
    outcome: &AccountOutcome,
    now: i64,
) -> AppResult<()> {
    let account = &outcome.account;

    // Also normalizes an override that was stored without a credential.
    sqlx::query(
        "UPDATE old_user SET plural_key = ?1, override_plural_id = ?2 \
         WHERE id = ?3 AND (plural_key IS NOT ?1 OR override_plural_id IS NOT ?2)",
    )
    .bind(account.credential())
    .bind(account.override_remote_id())
    .bind(&account.id)
    .execute(&mut *conn)
    .await?;

    let user = &outcome.user;
    sqlx::query(
        "INSERT INTO users (id, username, password_hash, role, plural_access_token, plural_override, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) \
         ON CONFLICT(id) DO UPDATE SET \
           username = excluded.username, \
           password_hash = excluded.password_hash, \
           role = excluded.role, \
           plural_access_token = excluded.plural_access_token, \
           plural_override = excluded.plural_override, \
           updated_at = excluded.updated_at",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.password_hash)
    .bind(user.role.as_str())
    .bind(user.access_token.as_deref())
    .bind(user.override_remote_id.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    match &outcome.system {
        Some(system) => write_system(conn, &account.id, system).await,
        None => {
            // Members and fields go with it through the cascade.
            sqlx::query("DELETE FROM systems WHERE user_id = ?1")
                .bind(&user.id)
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
    }
}

async fn write_system(
    conn: &mut SqliteConnection,
    account_id: &str,
    system: &OutputSystem,
) -> AppResult<()> {
    sqlx::query("DELETE FROM systems WHERE user_id = ?1 AND id <> ?2")
        .bind(&system.user_id)
        .bind(&system.id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO systems (id, user_id, plural_id, slug, visibility, description, assets_updated_at, \
           background_type, background_color, background_image) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(id) DO UPDATE SET \
           user_id = excluded.user_id, \
           plural_id = excluded.plural_id, \
           slug = excluded.slug, \
           visibility = excluded.visibility, \
           description = excluded.description, \
           assets_updated_at = excluded.assets_updated_at, \
           background_type = excluded.background_type, \
           background_color = excluded.background_color, \
           background_image = excluded.background_image",
    )
    .bind(&system.id)
    .bind(&system.user_id)
    .bind(&system.remote_id)
    .bind(&system.slug)
    .bind(system.visibility.as_str())
    .bind(system.description.as_deref())
    .bind(system.assets_updated_at)
    .bind(system.background.kind.as_str())
    .bind(system.background.color.as_deref())
    .bind(system.background.image.as_deref())
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE old_user SET \
           slug = COALESCE(slug, ?1), \
           system_id = COALESCE(system_id, ?2), \
           last_time_asset_changed = COALESCE(last_time_asset_changed, ?3) \
         WHERE id = ?4",
    )
    .bind(&system.slug)
    .bind(&system.id)
    .bind(system.assets_updated_at)
    .bind(account_id)
    .execute(&mut *conn)
    .await?;

    // Rows the remote no longer lists are pruned before upserting so a
    // reused slug cannot collide with a stale member.
    let member_ids = id_list(system.members.iter().map(|m| m.id.as_str()));
    sqlx::query(
        "DELETE FROM members WHERE system_id = ?1 AND id NOT IN (SELECT value FROM json_each(?2))",
    )
    .bind(&system.id)
    .bind(member_ids)
    .execute(&mut *conn)
    .await?;

    let field_ids = id_list(system.fields.iter().map(|f| f.id.as_str()));
    sqlx::query(
        "DELETE FROM member_fields WHERE system_id = ?1 AND id NOT IN (SELECT value FROM json_each(?2))",
    )
    .bind(&system.id)
    .bind(field_ids)
    .execute(&mut *conn)
    .await?;

    for member in &system.members {
        write_member(conn, account_id, &system.id, member).await?;
    }
    for field in &system.fields {
        write_field(conn, account_id, &system.id, field).await?;
    }
    Ok(())
}

fn id_list<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    serde_json::Value::from(ids.collect::<Vec<_>>()).to_string()
}

async fn write_member(
    conn: &mut SqliteConnection,
    account_id: &str,
    system_id: &str,
    member: &OutputMember,
) -> AppResult<()> {
    // A member id stored under another system stays there; the account fails.
    let upserted = sqlx::query(
        "INSERT INTO members (id, system_id, slug, plural_id, plural_parent_id, visibility, \
           background_type, background_color, background_image, description, assets_updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(id) DO UPDATE SET \
           slug = excluded.slug, \
           plural_id = excluded.plural_id, \
           plural_parent_id = excluded.plural_parent_id, \
           visibility = excluded.visibility, \
           background_type = excluded.background_type, \
           background_color = excluded.background_color, \
           background_image = excluded.background_image, \
           description = excluded.description, \
           assets_updated_at = excluded.assets_updated_at \
         WHERE members.system_id = excluded.system_id",
    )
    .bind(&member.id)
    .bind(system_id)
    .bind(&member.slug)
    .bind(&member.remote_id)
    .bind(&member.remote_parent_id)
    .bind(member.visibility.as_str())
    .bind(member.background.kind.as_str())
    .bind(member.background.color.as_deref())
    .bind(member.background.image.as_deref())
    .bind(member.description.as_deref())
    .bind(member.assets_updated_at)
    .execute(&mut *conn)
    .await?;
    if upserted.rows_affected() == 0 {
        return Err(AppError::identity_conflict("member", &member.id, system_id));
    }

    // Identity write-back: existing ids and slugs are never overwritten.
    let updated = sqlx::query(
        "UPDATE old_user_member SET \
           id = COALESCE(id, ?1), \
           slug = COALESCE(slug, ?2), \
           last_time_asset_changed = COALESCE(last_time_asset_changed, ?3) \
         WHERE plural_id = ?4 AND plural_owner_id = ?5",
    )
    .bind(&member.id)
    .bind(&member.slug)
    .bind(member.assets_updated_at)
    .bind(&member.remote_id)
    .bind(&member.remote_parent_id)
    .execute(&mut *conn)
    .await?;
    if updated.rows_affected() > 0 {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO old_user_member (id, plural_id, plural_owner_id, user_id, slug, visible, \
           background_type, background_color, background_image, custom_description, last_time_asset_changed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )
    .bind(&member.id)
    .bind(&member.remote_id)
    .bind(&member.remote_parent_id)
    .bind(account_id)
    .bind(&member.slug)
    .bind(member.visibility.is_public())
    .bind(member.background.kind.as_str())
    .bind(member.background.color.as_deref())
    .bind(member.background.image.as_deref())
    .bind(member.description.as_deref())
    .bind(member.assets_updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_field(
    conn: &mut SqliteConnection,
    account_id: &str,
    system_id: &str,
    field: &OutputField,
) -> AppResult<()> {
    let upserted = sqlx::query(
        "INSERT INTO member_fields (id, system_id, plural_id, plural_parent_id, name, position, type, visibility) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(id) DO UPDATE SET \
           plural_id = excluded.plural_id, \
           plural_parent_id = excluded.plural_parent_id, \
           name = excluded.name, \
           position = excluded.position, \
           type = excluded.type, \
           visibility = excluded.visibility \
         WHERE member_fields.system_id = excluded.system_id",
    )
    .bind(&field.id)
    .bind(system_id)
    .bind(&field.remote_id)
    .bind(&field.remote_parent_id)
    .bind(&field.name)
    .bind(field.position)
    .bind(field.field_type.as_str())
    .bind(field.visibility.as_str())
    .execute(&mut *conn)
    .await?;
    if upserted.rows_affected() == 0 {
        return Err(AppError::identity_conflict("field", &field.id, system_id));
    }

    let updated = sqlx::query(
        "UPDATE old_user_field SET id = COALESCE(id, ?1) WHERE plural_id = ?2",
    )
    .bind(&field.id)
    .bind(&field.remote_id)
    .execute(&mut *conn)
    .await?;
    if updated.rows_affected() > 0 {
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO old_user_field (id, plural_id, plural_owner_id, user_id, name, position, type, visible) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&field.id)
    .bind(&field.remote_id)
    .bind(&field.remote_parent_id)
    .bind(account_id)
    .bind(&field.name)
    .bind(field.position)
    .bind(field.field_type.as_str())
    .bind(field.visibility.is_public())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
