//! Record types flowing through a migration run.
//!
//! Legacy records are read from the pre-migration tables, remote records are
//! validated snapshots of the remote system API, and output records are what
//! the batch writer persists into the new schema.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field_type::FieldType;
use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub const fn from_visible(visible: bool) -> Self {
        if visible {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }

    /// Public unless the remote marks the entity private or trusted-only.
    pub const fn from_remote_flags(private: bool, prevent_trusted: bool) -> Self {
        Self::from_visible(!private && !prevent_trusted)
    }

    pub const fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "Public",
            Visibility::Private => "Private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackgroundType {
    #[default]
    Color,
    Image,
}

impl BackgroundType {
    pub const fn as_str(self) -> &'static str {
        match self {
            BackgroundType::Color => "Color",
            BackgroundType::Image => "Image",
        }
    }
}

impl FromStr for BackgroundType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Color" => Ok(BackgroundType::Color),
            "Image" => Ok(BackgroundType::Image),
            other => Err(
                AppError::new("LEGACY/BACKGROUND_TYPE", "Unknown background type.")
                    .with_context("value", other),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub const fn from_admin(admin: bool) -> Self {
        if admin {
            UserRole::Admin
        } else {
            UserRole::User
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "User",
            UserRole::Admin => "Admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Background {
    pub kind: BackgroundType,
    pub color: Option<String>,
    pub image: Option<String>,
}

/// The stored remote credential together with the admin override target.
///
/// Both describe one remote linkage, so they are held and cleared as a unit.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteLinkage {
    pub credential: String,
    pub override_remote_id: Option<String>,
}

impl RemoteLinkage {
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            override_remote_id: None,
        }
    }

    pub fn with_override(mut self, remote_id: impl Into<String>) -> Self {
        self.override_remote_id = Some(remote_id.into());
        self
    }
}

// Never print the credential.
impl fmt::Debug for RemoteLinkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteLinkage")
            .field("credential", &"<redacted>")
            .field("override_remote_id", &self.override_remote_id)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyAccount {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub admin: bool,
    pub linkage: Option<RemoteLinkage>,
    pub slug: Option<String>,
    pub visible: bool,
    pub background: Background,
    pub description: Option<String>,
    pub assets_changed_at: Option<i64>,
    /// Id of the output system minted on an earlier run.
    pub system_id: Option<String>,
}

impl LegacyAccount {
    /// Drops the remote linkage. Returns whether anything was cleared.
    pub fn revoke_linkage(&mut self) -> bool {
        self.linkage.take().is_some()
    }

    pub fn credential(&self) -> Option<&str> {
        self.linkage.as_ref().map(|l| l.credential.as_str())
    }

    pub fn override_remote_id(&self) -> Option<&str> {
        self.linkage
            .as_ref()
            .and_then(|l| l.override_remote_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMember {
    pub id: Option<String>,
    pub remote_id: String,
    pub remote_owner_id: String,
    pub account_id: String,
    pub slug: Option<String>,
    pub visible: bool,
    pub background: Background,
    pub description: Option<String>,
    pub assets_changed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyField {
    pub id: Option<String>,
    pub remote_id: String,
    pub remote_owner_id: String,
    pub account_id: String,
    pub name: String,
    pub position: i64,
    pub field_type: FieldType,
    pub visible: bool,
}

/// A remote account that has passed validation as a real system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSnapshot {
    pub id: String,
    pub username: String,
    pub fields: BTreeMap<String, RemoteField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteField {
    pub name: String,
    pub order: i64,
    pub private: bool,
    pub prevent_trusted: bool,
    /// `None` when the remote sent something that is not an integer.
    pub type_ordinal: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMember {
    pub id: String,
    pub name: String,
    pub private: bool,
    pub prevent_trusted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputUser {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub override_remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSystem {
    pub id: String,
    pub user_id: String,
    pub remote_id: String,
    pub slug: String,
    pub visibility: Visibility,
    pub background: Background,
    pub description: Option<String>,
    pub assets_updated_at: i64,
    pub members: Vec<OutputMember>,
    pub fields: Vec<OutputField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputMember {
    pub id: String,
    pub slug: String,
    pub remote_id: String,
    pub remote_parent_id: String,
    pub visibility: Visibility,
    pub background: Background,
    pub description: Option<String>,
    pub assets_updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputField {
    pub id: String,
    pub remote_id: String,
    pub remote_parent_id: String,
    pub name: String,
    pub position: i64,
    pub field_type: FieldType,
    pub visibility: Visibility,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_remote_flag_hides() {
        assert_eq!(Visibility::from_remote_flags(false, false), Visibility::Public);
        assert_eq!(Visibility::from_remote_flags(true, false), Visibility::Private);
        assert_eq!(Visibility::from_remote_flags(false, true), Visibility::Private);
        assert_eq!(Visibility::from_remote_flags(true, true), Visibility::Private);
    }

    #[test]
    fn linkage_debug_redacts_credential() {
        let linkage = RemoteLinkage::new("tok-secret").with_override("r9");
        let rendered = format!("{linkage:?}");
        assert!(!rendered.contains("tok-secret"));
        assert!(rendered.contains("r9"));
    }

    #[test]
    fn revoking_clears_credential_and_override_together() {
        let mut account = LegacyAccount {
            id: "u1".into(),
            username: "sam".into(),
            password_hash: "hash".into(),
            admin: true,
            linkage: Some(RemoteLinkage::new("tok").with_override("r2")),
            slug: None,
            visible: true,
            background: Background::default(),
            description: None,
            assets_changed_at: None,
            system_id: None,
        };
        assert!(account.revoke_linkage());
        assert_eq!(account.credential(), None);
        assert_eq!(account.override_remote_id(), None);
        assert!(!account.revoke_linkage());
    }

    #[test]
    fn background_type_parses_storage_names() {
        assert_eq!("Image".parse::<BackgroundType>().unwrap(), BackgroundType::Image);
        assert!("Gradient".parse::<BackgroundType>().is_err());
    }
}
