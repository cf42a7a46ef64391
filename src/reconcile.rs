//! Per-account reconciliation of legacy records against the remote system.
//!
//! Identity (ids, slugs) is owned by the local store and never regenerated
//! once assigned. Content (names, order, flags, types) is owned by the
//! remote and replaces whatever was migrated before. Any failure to obtain
//! a usable remote snapshot degrades the account to credential-less with
//! no system instead of failing it.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::field_type::{normalize_type, FieldTypeError};
use crate::id::new_uuid_v7;
use crate::legacy::LegacyStore;
use crate::model::{
    Background, LegacyAccount, LegacyField, LegacyMember, OutputField, OutputMember, OutputSystem,
    OutputUser, RemoteField, RemoteMember, RemoteSnapshot, UserRole, Visibility,
};
use crate::remote::{FetchTarget, RemoteAccountEntry, RemoteError, SnapshotFetcher};
use crate::slug::SlugSource;
use crate::time::now_ms;
use crate::AppResult;

/// A remote field that could not be carried over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedField {
    pub remote_id: String,
    pub error: FieldTypeError,
}

/// Everything the batch writer needs to persist one account.
#[derive(Debug, Clone)]
pub struct AccountOutcome {
    /// The legacy account after any credential revocation.
    pub account: LegacyAccount,
    pub user: OutputUser,
    pub system: Option<OutputSystem>,
    /// The account held a credential before this run and lost it.
    pub revoked: bool,
    /// Why the remote was unusable, if it was.
    pub remote_failure: Option<RemoteError>,
    pub dropped_fields: Vec<DroppedField>,
}

impl AccountOutcome {
    pub fn members(&self) -> &[OutputMember] {
        self.system.as_ref().map_or(&[], |s| s.members.as_slice())
    }

    pub fn fields(&self) -> &[OutputField] {
        self.system.as_ref().map_or(&[], |s| s.fields.as_slice())
    }
}

struct RemoteMerge {
    snapshot: RemoteSnapshot,
    members: Vec<OutputMember>,
    fields: Vec<OutputField>,
    dropped: Vec<DroppedField>,
}

enum RemoteState {
    Usable(RemoteMerge),
    Unusable(RemoteError),
}

pub struct Reconciler<'a> {
    store: &'a dyn LegacyStore,
    fetcher: &'a dyn SnapshotFetcher,
    slugs: &'a dyn SlugSource,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn LegacyStore,
        fetcher: &'a dyn SnapshotFetcher,
        slugs: &'a dyn SlugSource,
    ) -> Self {
        Self {
            store,
            fetcher,
            slugs,
        }
    }

    /// Computes the output graph for one account.
    ///
    /// Remote problems never surface as errors. An `Err` means the local
    /// store could not be read and the account should be retried later.
    pub async fn reconcile(&self, mut account: LegacyAccount) -> AppResult<AccountOutcome> {
        let now = now_ms();
        debug!(
            target: "sysmigrate",
            event = "account_start",
            account_id = %account.id,
            has_credential = account.linkage.is_some(),
            admin = account.admin
        );

        let (merge, remote_failure) = match self.merge_remote(&account, now).await? {
            RemoteState::Usable(merge) => (Some(merge), None),
            RemoteState::Unusable(err) => (None, Some(err)),
        };

        let mut revoked = false;
        if let Some(err) = &remote_failure {
            if !matches!(err, RemoteError::MissingCredential) {
                warn!(
                    target: "sysmigrate",
                    event = "remote_unusable",
                    account_id = %account.id,
                    code = err.code(),
                    error = %err
                );
            }
            revoked = account.revoke_linkage();
            if revoked {
                info!(target: "sysmigrate", event = "credential_revoked", account_id = %account.id);
            }
        }

        let user = output_user(&account);
        let (system, dropped_fields) = match merge {
            Some(merge) => {
                let system = output_system(
                    &account,
                    &merge.snapshot,
                    merge.members,
                    merge.fields,
                    self.slugs,
                    now,
                );
                (Some(system), merge.dropped)
            }
            None => (None, Vec::new()),
        };

        Ok(AccountOutcome {
            account,
            user,
            system,
            revoked,
            remote_failure,
            dropped_fields,
        })
    }

    async fn merge_remote(&self, account: &LegacyAccount, now: i64) -> AppResult<RemoteState> {
        let Some(credential) = account.credential() else {
            return Ok(RemoteState::Unusable(RemoteError::MissingCredential));
        };

        let target = fetch_target(account);
        let snapshot = match self
            .fetcher
            .fetch_account(credential, &target)
            .await
            .and_then(RemoteAccountEntry::into_snapshot)
        {
            Ok(snapshot) => snapshot,
            Err(err) => return Ok(RemoteState::Unusable(err)),
        };

        let entries = match self.fetcher.fetch_members(credential, &snapshot.id).await {
            Ok(entries) => entries,
            Err(err) => return Ok(RemoteState::Unusable(err)),
        };

        let mut seen = HashSet::new();
        let mut members = Vec::with_capacity(entries.len());
        for remote in entries.into_iter().filter_map(|e| e.into_member()) {
            if !seen.insert(remote.id.clone()) {
                warn!(
                    target: "sysmigrate",
                    event = "remote_member_duplicate",
                    account_id = %account.id,
                    plural_id = %remote.id
                );
                continue;
            }
            let existing = self.store.find_member(&remote.id, &snapshot.id).await?;
            members.push(merge_member(existing, &remote, &snapshot.id, self.slugs, now));
        }

        let mut fields = Vec::with_capacity(snapshot.fields.len());
        let mut dropped = Vec::new();
        for (remote_id, remote) in &snapshot.fields {
            let existing = self.store.find_field(remote_id).await?;
            match merge_field(existing, remote_id, remote, &snapshot.id) {
                Ok(field) => fields.push(field),
                Err(error) => {
                    warn!(
                        target: "sysmigrate",
                        event = "field_dropped",
                        account_id = %account.id,
                        plural_id = %remote_id,
                        error = %error
                    );
                    dropped.push(DroppedField {
                        remote_id: remote_id.clone(),
                        error,
                    });
                }
            }
        }

        Ok(RemoteState::Usable(RemoteMerge {
            snapshot,
            members,
            fields,
            dropped,
        }))
    }
}

/// Admins with an override fetch that account; everyone else fetches their own.
pub fn fetch_target(account: &LegacyAccount) -> FetchTarget {
    match account.override_remote_id() {
        Some(remote_id) if account.admin => FetchTarget::User(remote_id.to_string()),
        _ => FetchTarget::Me,
    }
}

/// Merges a remote member with its previously migrated record, if any.
pub fn merge_member(
    existing: Option<LegacyMember>,
    remote: &RemoteMember,
    system_remote_id: &str,
    slugs: &dyn SlugSource,
    now: i64,
) -> OutputMember {
    let visibility = Visibility::from_remote_flags(remote.private, remote.prevent_trusted);
    match existing {
        Some(old) => OutputMember {
            id: old.id.unwrap_or_else(new_uuid_v7),
            slug: old.slug.unwrap_or_else(|| slugs.make_slug(&remote.name)),
            remote_id: old.remote_id,
            remote_parent_id: old.remote_owner_id,
            visibility,
            background: old.background,
            description: old.description,
            assets_updated_at: old.assets_changed_at.unwrap_or(now),
        },
        None => OutputMember {
            id: new_uuid_v7(),
            slug: slugs.make_slug(&remote.name),
            remote_id: remote.id.clone(),
            remote_parent_id: system_remote_id.to_string(),
            visibility,
            background: Background::default(),
            description: None,
            assets_updated_at: now,
        },
    }
}

/// Merges a remote field definition with its previously migrated record.
///
/// Fails when the remote type cannot be normalized; the caller drops the
/// field in that case, even if it was migrated before.
pub fn merge_field(
    existing: Option<LegacyField>,
    remote_id: &str,
    remote: &RemoteField,
    system_remote_id: &str,
) -> Result<OutputField, FieldTypeError> {
    let ordinal = remote.type_ordinal.ok_or(FieldTypeError::NotAnOrdinal)?;
    let field_type = normalize_type(ordinal)?;
    Ok(OutputField {
        id: existing.and_then(|f| f.id).unwrap_or_else(new_uuid_v7),
        remote_id: remote_id.to_string(),
        remote_parent_id: system_remote_id.to_string(),
        name: remote.name.clone(),
        position: remote.order,
        field_type,
        visibility: Visibility::from_remote_flags(remote.private, remote.prevent_trusted),
    })
}

fn output_user(account: &LegacyAccount) -> OutputUser {
    OutputUser {
        id: account.id.clone(),
        username: account.username.clone(),
        password_hash: account.password_hash.clone(),
        role: UserRole::from_admin(account.admin),
        access_token: account.credential().map(str::to_string),
        override_remote_id: account
            .override_remote_id()
            .filter(|_| account.admin)
            .map(str::to_string),
    }
}

fn output_system(
    account: &LegacyAccount,
    snapshot: &RemoteSnapshot,
    members: Vec<OutputMember>,
    fields: Vec<OutputField>,
    slugs: &dyn SlugSource,
    now: i64,
) -> OutputSystem {
    let slug = account.slug.clone().unwrap_or_else(|| {
        let name = if snapshot.username.trim().is_empty() {
            &account.username
        } else {
            &snapshot.username
        };
        slugs.make_slug(name)
    });

    OutputSystem {
        id: account.system_id.clone().unwrap_or_else(new_uuid_v7),
        user_id: account.id.clone(),
        remote_id: snapshot.id.clone(),
        slug,
        visibility: Visibility::from_visible(account.visible),
        background: account.background.clone(),
        description: account.description.clone(),
        assets_updated_at: account.assets_changed_at.unwrap_or(now),
        members,
        fields,
    }
}
