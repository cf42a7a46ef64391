#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use sysmigrate_lib::migrate;
use sysmigrate_lib::remote::{
    FetchTarget, RemoteAccountEntry, RemoteError, RemoteMemberEntry, SnapshotFetcher,
};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn migrated_pool() -> SqlitePool {
    let pool = temp_pool().await;
    migrate::apply_migrations(&pool).await.expect("apply migrations");
    pool
}

pub struct SeedAccount<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub admin: bool,
    pub credential: Option<&'a str>,
    pub override_remote_id: Option<&'a str>,
    pub slug: Option<&'a str>,
}

impl<'a> SeedAccount<'a> {
    pub fn new(id: &'a str, credential: Option<&'a str>) -> Self {
        Self {
            id,
            username: id,
            admin: false,
            credential,
            override_remote_id: None,
            slug: None,
        }
    }
}

pub async fn seed_account(pool: &SqlitePool, account: SeedAccount<'_>) {
    sqlx::query(
        "INSERT INTO old_user (id, username, password_hash, admin, plural_key, override_plural_id, slug, last_time_asset_changed) \
         VALUES (?1, ?2, 'hash', ?3, ?4, ?5, ?6, 1000)",
    )
    .bind(account.id)
    .bind(account.username)
    .bind(account.admin)
    .bind(account.credential)
    .bind(account.override_remote_id)
    .bind(account.slug)
    .execute(pool)
    .await
    .expect("seed old_user");
}

pub async fn seed_member(
    pool: &SqlitePool,
    id: &str,
    remote_id: &str,
    remote_owner_id: &str,
    account_id: &str,
    slug: &str,
) {
    sqlx::query(
        "INSERT INTO old_user_member (id, plural_id, plural_owner_id, user_id, slug, last_time_asset_changed) \
         VALUES (?1, ?2, ?3, ?4, ?5, 500)",
    )
    .bind(id)
    .bind(remote_id)
    .bind(remote_owner_id)
    .bind(account_id)
    .bind(slug)
    .execute(pool)
    .await
    .expect("seed old_user_member");
}

#[derive(Clone)]
struct Script {
    account: Result<Value, RemoteError>,
    members: Result<Value, RemoteError>,
}

/// In-process fetcher answering per credential. Unknown credentials get a 401.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedFetcher {
    pub fn respond(&self, credential: &str, account: Value, members: Value) {
        self.scripts.lock().unwrap().insert(
            credential.to_string(),
            Script {
                account: Ok(account),
                members: Ok(members),
            },
        );
    }

    pub fn fail(&self, credential: &str, err: RemoteError) {
        self.scripts.lock().unwrap().insert(
            credential.to_string(),
            Script {
                account: Err(err),
                members: Ok(Value::Null),
            },
        );
    }

    /// `(credential, path)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn script(&self, credential: &str, path: &str) -> Result<Script, RemoteError> {
        self.calls
            .lock()
            .unwrap()
            .push((credential.to_string(), path.to_string()));
        self.scripts
            .lock()
            .unwrap()
            .get(credential)
            .cloned()
            .ok_or_else(|| RemoteError::Status {
                path: path.to_string(),
                status: 401,
            })
    }
}

#[async_trait]
impl SnapshotFetcher for ScriptedFetcher {
    async fn fetch_account(
        &self,
        credential: &str,
        target: &FetchTarget,
    ) -> Result<RemoteAccountEntry, RemoteError> {
        let value = self.script(credential, &target.path())?.account?;
        serde_json::from_value(value).map_err(|err| RemoteError::Malformed(err.to_string()))
    }

    async fn fetch_members(
        &self,
        credential: &str,
        account_remote_id: &str,
    ) -> Result<Vec<RemoteMemberEntry>, RemoteError> {
        let path = format!("/members/{account_remote_id}");
        let value = self.script(credential, &path)?.members?;
        serde_json::from_value::<Option<Vec<RemoteMemberEntry>>>(value)
            .map(Option::unwrap_or_default)
            .map_err(|err| RemoteError::Malformed(err.to_string()))
    }
}
