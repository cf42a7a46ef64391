//! Remote system API: fetch interface, wire payloads, and their validation.
//!
//! Payloads are decoded leniently (unknown keys ignored, absent collections
//! treated as empty) and then validated explicitly before the reconciler
//! trusts any of their content.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{RemoteField, RemoteMember, RemoteSnapshot};
use crate::AppError;

pub mod http;

pub use http::HttpFetcher;

/// Which remote account a fetch addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// The account that owns the credential.
    Me,
    /// An explicit account, used for admin overrides.
    User(String),
}

impl FetchTarget {
    pub fn path(&self) -> String {
        match self {
            FetchTarget::Me => "/me".to_string(),
            FetchTarget::User(id) => format!("/user/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("no stored credential")]
    MissingCredential,
    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },
    #[error("request to {path} returned status {status}")]
    Status { path: String, status: u16 },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("remote account {remote_id:?} is not a system")]
    NotASystem { remote_id: String },
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::MissingCredential => "REMOTE/MISSING_CREDENTIAL",
            RemoteError::Transport { .. } => "REMOTE/TRANSPORT",
            RemoteError::Status { .. } => "REMOTE/STATUS",
            RemoteError::Malformed(_) => "REMOTE/MALFORMED",
            RemoteError::NotASystem { .. } => "REMOTE/NOT_A_SYSTEM",
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        let app = AppError::new(error.code(), error.to_string());
        match error {
            RemoteError::Transport { path, .. } => app.with_context("path", path),
            RemoteError::Status { path, status } => app
                .with_context("path", path)
                .with_context("status", status.to_string()),
            RemoteError::NotASystem { remote_id } => app.with_context("remote_id", remote_id),
            _ => app,
        }
    }
}

/// Source of remote account snapshots and member lists.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_account(
        &self,
        credential: &str,
        target: &FetchTarget,
    ) -> Result<RemoteAccountEntry, RemoteError>;

    async fn fetch_members(
        &self,
        credential: &str,
        account_remote_id: &str,
    ) -> Result<Vec<RemoteMemberEntry>, RemoteError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAccountEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: Option<RemoteAccountContent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteAccountContent {
    #[serde(default, rename = "isAsystem")]
    pub is_a_system: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub fields: Option<BTreeMap<String, RemoteFieldEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteFieldEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub order: Value,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default, rename = "preventTrusted")]
    pub prevent_trusted: Option<bool>,
    #[serde(default, rename = "type")]
    pub field_type: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMemberEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: RemoteMemberContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteMemberContent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub private: Option<bool>,
    #[serde(default, rename = "preventTrusted")]
    pub prevent_trusted: Option<bool>,
}

impl RemoteAccountEntry {
    /// Accepts the payload only if it explicitly reports itself as a system.
    pub fn into_snapshot(self) -> Result<RemoteSnapshot, RemoteError> {
        let content = self
            .content
            .ok_or_else(|| RemoteError::Malformed("account payload has no content".into()))?;
        if content.is_a_system != Some(true) {
            return Err(RemoteError::NotASystem { remote_id: self.id });
        }
        if self.id.trim().is_empty() {
            return Err(RemoteError::Malformed("account payload has no id".into()));
        }

        let fields = content
            .fields
            .unwrap_or_default()
            .into_iter()
            .filter(|(id, _)| !id.trim().is_empty())
            .map(|(id, entry)| (id, entry.into_field()))
            .collect();

        Ok(RemoteSnapshot {
            id: self.id,
            username: content.username.unwrap_or_default(),
            fields,
        })
    }
}

impl RemoteFieldEntry {
    fn into_field(self) -> RemoteField {
        RemoteField {
            name: self.name.unwrap_or_default(),
            order: integral(&self.order).unwrap_or(0),
            private: self.private.unwrap_or(false),
            prevent_trusted: self.prevent_trusted.unwrap_or(false),
            type_ordinal: integral(&self.field_type),
        }
    }
}

impl RemoteMemberEntry {
    /// `None` for entries without an id; there is nothing to key them on.
    pub fn into_member(self) -> Option<RemoteMember> {
        if self.id.trim().is_empty() {
            return None;
        }
        Some(RemoteMember {
            id: self.id,
            name: self.content.name.unwrap_or_default(),
            private: self.content.private.unwrap_or(false),
            prevent_trusted: self.content.prevent_trusted.unwrap_or(false),
        })
    }
}

/// Integers, whole floats and numeric strings; anything else is rejected.
fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account(value: Value) -> RemoteAccountEntry {
        serde_json::from_value(value).expect("decode account")
    }

    #[test]
    fn valid_system_becomes_snapshot() {
        let snapshot = account(json!({
            "id": "r1",
            "content": {
                "isAsystem": true,
                "username": "Sam",
                "uid": "ignored",
                "fields": {
                    "f1": {"name": "Pronouns", "order": 2, "private": false, "preventTrusted": true, "type": 0}
                }
            }
        }))
        .into_snapshot()
        .expect("valid system");

        assert_eq!(snapshot.id, "r1");
        assert_eq!(snapshot.username, "Sam");
        let field = &snapshot.fields["f1"];
        assert_eq!(field.name, "Pronouns");
        assert_eq!(field.order, 2);
        assert!(field.prevent_trusted);
        assert_eq!(field.type_ordinal, Some(0));
    }

    #[test]
    fn missing_or_false_system_flag_is_rejected() {
        let flagged_false = account(json!({"id": "r1", "content": {"isAsystem": false}}));
        assert_eq!(
            flagged_false.into_snapshot(),
            Err(RemoteError::NotASystem {
                remote_id: "r1".into()
            })
        );

        let flag_absent = account(json!({"id": "r1", "content": {"username": "Sam"}}));
        assert!(matches!(
            flag_absent.into_snapshot(),
            Err(RemoteError::NotASystem { .. })
        ));

        let no_content = account(json!({"id": "r1"}));
        assert!(matches!(
            no_content.into_snapshot(),
            Err(RemoteError::Malformed(_))
        ));
    }

    #[test]
    fn missing_fields_map_is_empty() {
        let snapshot = account(json!({"id": "r1", "content": {"isAsystem": true}}))
            .into_snapshot()
            .expect("valid");
        assert!(snapshot.fields.is_empty());
        assert_eq!(snapshot.username, "");
    }

    #[test]
    fn non_integral_type_is_kept_as_unknown() {
        let snapshot = account(json!({
            "id": "r1",
            "content": {"isAsystem": true, "fields": {
                "f1": {"name": "A", "order": "3", "type": 2.0},
                "f2": {"name": "B", "order": 1.5, "type": "color"},
                "f3": {"name": "C", "type": null}
            }}
        }))
        .into_snapshot()
        .expect("valid");

        assert_eq!(snapshot.fields["f1"].type_ordinal, Some(2));
        assert_eq!(snapshot.fields["f1"].order, 3);
        assert_eq!(snapshot.fields["f2"].type_ordinal, None);
        assert_eq!(snapshot.fields["f2"].order, 0);
        assert_eq!(snapshot.fields["f3"].type_ordinal, None);
    }

    #[test]
    fn member_without_id_is_skipped() {
        let members: Vec<RemoteMemberEntry> = serde_json::from_value(json!([
            {"id": "m1", "content": {"name": "Alex", "private": true}},
            {"id": "", "content": {"name": "Ghost"}},
            {"id": "m2"}
        ]))
        .expect("decode members");
        let members: Vec<_> = members.into_iter().filter_map(|m| m.into_member()).collect();
        assert_eq!(members.len(), 2);
        assert!(members[0].private);
        assert_eq!(members[1].name, "");
        assert!(!members[1].prevent_trusted);
    }

    #[test]
    fn targets_map_to_paths() {
        assert_eq!(FetchTarget::Me.path(), "/me");
        assert_eq!(FetchTarget::User("r9".into()).path(), "/user/r9");
    }

    #[test]
    fn remote_errors_carry_codes() {
        let err = AppError::from(RemoteError::Status {
            path: "/me".into(),
            status: 401,
        });
        assert_eq!(err.code(), "REMOTE/STATUS");
        assert_eq!(err.context().get("status"), Some(&"401".to_string()));
    }
}
