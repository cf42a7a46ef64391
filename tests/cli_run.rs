use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tempfile::tempdir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sysmigrate() -> Result<Command> {
    let mut cmd = Command::cargo_bin("sysmigrate")?;
    for var in [
        "SYSMIGRATE_DB",
        "SYSMIGRATE_REMOTE_URL",
        "SYSMIGRATE_TIMEOUT_SECS",
        "SYSMIGRATE_CONCURRENCY",
        "SYSMIGRATE_LOG_DIR",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("SYSMIGRATE_LOG", "sysmigrate=warn");
    Ok(cmd)
}

async fn seed(db_path: &Path) -> Result<()> {
    let mut conn =
        SqliteConnection::connect_with(&SqliteConnectOptions::new().filename(db_path)).await?;
    sqlx::query(
        "INSERT INTO old_user (id, username, password_hash, admin, plural_key) VALUES \
         ('u1', 'sam', 'hash', 0, 'tok'), \
         ('u2', 'kit', 'hash', 0, 'dead'), \
         ('u3', 'lee', 'hash', 0, NULL)",
    )
    .execute(&mut conn)
    .await?;
    conn.close().await?;
    Ok(())
}

#[test]
fn dry_run_on_empty_database_succeeds() -> Result<()> {
    let dir = tempdir()?;
    let db = dir.path().join("nested").join("sysmigrate.sqlite3");

    let output = sysmigrate()?
        .args(["run", "--dry-run", "--db"])
        .arg(&db)
        .output()?;
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let report: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["processed"], 0);
    assert_eq!(report["dry_run"], true);
    assert!(db.exists());
    Ok(())
}

#[test]
fn invalid_concurrency_is_a_setup_error() -> Result<()> {
    let dir = tempdir()?;
    let output = sysmigrate()?
        .args(["run", "--concurrency", "0", "--db"])
        .arg(dir.path().join("db.sqlite3"))
        .output()?;
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("CONFIG/CONCURRENCY"));
    Ok(())
}

#[tokio::test]
async fn run_against_remote_revokes_dead_credentials() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .and(header("authorization", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "r1",
            "content": {"isAsystem": true, "username": "Sam"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/members/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "m1", "content": {"name": "Alex"}}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/me"))
        .and(header("authorization", "dead"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempdir()?;
    let db = dir.path().join("sysmigrate.sqlite3");
    let logs = dir.path().join("logs");

    // First pass only creates the schema.
    let output = sysmigrate()?
        .args(["run", "--dry-run", "--db"])
        .arg(&db)
        .output()?;
    assert!(output.status.success());
    seed(&db).await?;

    let remote_url = format!("{}/v1", server.uri());
    let db_arg = db.clone();
    let logs_arg = logs.clone();
    let output = tokio::task::spawn_blocking(move || {
        sysmigrate()?
            .args(["run", "--timeout-secs", "5", "--remote-url", remote_url.as_str(), "--db"])
            .arg(&db_arg)
            .arg("--log-dir")
            .arg(&logs_arg)
            .output()
            .map_err(anyhow::Error::from)
    })
    .await??;
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["processed"], 3);
    assert_eq!(report["committed"], 3);
    assert_eq!(report["with_system"], 1);
    assert_eq!(report["credentials_revoked"], 1);
    assert_eq!(report["members"], 1);

    let mut conn =
        SqliteConnection::connect_with(&SqliteConnectOptions::new().filename(&db)).await?;
    let key: Option<String> =
        sqlx::query_scalar("SELECT plural_key FROM old_user WHERE id = 'u2'")
            .fetch_one(&mut conn)
            .await?;
    assert_eq!(key, None);
    conn.close().await?;

    assert!(std::fs::read_dir(&logs)?.next().is_some(), "log file written");
    Ok(())
}
