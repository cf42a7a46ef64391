use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::field_type::FieldType;
use crate::model::{
    Background, BackgroundType, LegacyAccount, LegacyField, LegacyMember, RemoteLinkage,
};
use crate::{AppError, AppResult};

/// Read access to the pre-migration tables.
#[async_trait]
pub trait LegacyStore: Send + Sync {
    async fn list_accounts(&self) -> AppResult<Vec<LegacyAccount>>;

    /// The previously migrated member for a remote member of a remote system.
    async fn find_member(
        &self,
        remote_member_id: &str,
        remote_owner_id: &str,
    ) -> AppResult<Option<LegacyMember>>;

    async fn find_field(&self, remote_field_id: &str) -> AppResult<Option<LegacyField>>;
}

#[derive(Debug, Clone)]
pub struct SqliteLegacyStore {
    pool: SqlitePool,
}

impl SqliteLegacyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const ACCOUNT_COLUMNS: &str = "id, username, password_hash, admin, plural_key, override_plural_id, \
     slug, visible, background_type, background_color, background_image, custom_description, \
     last_time_asset_changed, system_id";

const MEMBER_COLUMNS: &str = "id, plural_id, plural_owner_id, user_id, slug, visible, \
     background_type, background_color, background_image, custom_description, \
     last_time_asset_changed";

const FIELD_COLUMNS: &str =
    "id, plural_id, plural_owner_id, user_id, name, position, type, visible";

fn background_from_row(row: &SqliteRow, owner: &str) -> AppResult<Background> {
    let raw: String = row.try_get("background_type")?;
    let kind = raw.parse::<BackgroundType>().unwrap_or_else(|err| {
        warn!(
            target: "sysmigrate",
            event = "legacy_background_type_unknown",
            owner,
            value = %raw,
            error = %err
        );
        BackgroundType::Color
    });
    Ok(Background {
        kind,
        color: row.try_get("background_color")?,
        image: row.try_get("background_image")?,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn account_from_row(row: &SqliteRow) -> AppResult<LegacyAccount> {
    let id: String = row.try_get("id")?;
    let credential = non_blank(row.try_get("plural_key")?);
    let override_remote_id = non_blank(row.try_get("override_plural_id")?);
    // An override without a credential is dangling and dropped with it.
    let linkage = credential.map(|credential| RemoteLinkage {
        credential,
        override_remote_id,
    });

    Ok(LegacyAccount {
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        admin: row.try_get("admin")?,
        linkage,
        slug: non_blank(row.try_get("slug")?),
        visible: row.try_get("visible")?,
        background: background_from_row(row, &id)?,
        description: row.try_get("custom_description")?,
        assets_changed_at: row.try_get("last_time_asset_changed")?,
        system_id: non_blank(row.try_get("system_id")?),
        id,
    })
}

fn member_from_row(row: &SqliteRow) -> AppResult<LegacyMember> {
    let id: Option<String> = row.try_get("id")?;
    let remote_id: String = row.try_get("plural_id")?;
    Ok(LegacyMember {
        background: background_from_row(row, &remote_id)?,
        id,
        remote_id,
        remote_owner_id: row.try_get("plural_owner_id")?,
        account_id: row.try_get("user_id")?,
        slug: non_blank(row.try_get("slug")?),
        visible: row.try_get("visible")?,
        description: row.try_get("custom_description")?,
        assets_changed_at: row.try_get("last_time_asset_changed")?,
    })
}

fn field_from_row(row: &SqliteRow) -> AppResult<LegacyField> {
    let raw_type: String = row.try_get("type")?;
    let remote_id: String = row.try_get("plural_id")?;
    // The remote definition replaces the stored type on every run.
    let field_type = raw_type.parse::<FieldType>().unwrap_or_else(|err| {
        warn!(
            target: "sysmigrate",
            event = "legacy_field_type_unknown",
            plural_id = %remote_id,
            error = %err
        );
        FieldType::String
    });
    Ok(LegacyField {
        id: row.try_get("id")?,
        remote_id,
        remote_owner_id: row.try_get("plural_owner_id")?,
        account_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        position: row.try_get("position")?,
        field_type,
        visible: row.try_get("visible")?,
    })
}

#[async_trait]
impl LegacyStore for SqliteLegacyStore {
    async fn list_accounts(&self) -> AppResult<Vec<LegacyAccount>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM old_user ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "legacy_list_accounts"))?;
        rows.iter().map(account_from_row).collect()
    }

    async fn find_member(
        &self,
        remote_member_id: &str,
        remote_owner_id: &str,
    ) -> AppResult<Option<LegacyMember>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM old_user_member WHERE plural_id = ?1 AND plural_owner_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(remote_member_id)
            .bind(remote_owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "legacy_find_member")
                    .with_context("plural_id", remote_member_id)
            })?;
        row.as_ref().map(member_from_row).transpose()
    }

    async fn find_field(&self, remote_field_id: &str) -> AppResult<Option<LegacyField>> {
        let sql = format!("SELECT {FIELD_COLUMNS} FROM old_user_field WHERE plural_id = ?1");
        let row = sqlx::query(&sql)
            .bind(remote_field_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "legacy_find_field")
                    .with_context("plural_id", remote_field_id)
            })?;
        row.as_ref().map(field_from_row).transpose()
    }
}
