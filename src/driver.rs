use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info};

use crate::legacy::LegacyStore;
use crate::model::LegacyAccount;
use crate::reconcile::{AccountOutcome, Reconciler};
use crate::remote::SnapshotFetcher;
use crate::slug::SlugSource;
use crate::writer::BatchWriter;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedAccount {
    pub account_id: String,
    pub code: String,
    pub message: String,
    /// Code of the innermost error when the failure wraps another one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Totals for one run, printed by the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub processed: usize,
    pub committed: usize,
    pub with_system: usize,
    pub without_system: usize,
    pub credentials_revoked: usize,
    pub members: usize,
    pub fields: usize,
    pub fields_dropped: usize,
    pub failed: Vec<FailedAccount>,
    pub dry_run: bool,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record_outcome(&mut self, outcome: &AccountOutcome) {
        if outcome.system.is_some() {
            self.with_system += 1;
        } else {
            self.without_system += 1;
        }
        if outcome.revoked {
            self.credentials_revoked += 1;
        }
        self.members += outcome.members().len();
        self.fields += outcome.fields().len();
        self.fields_dropped += outcome.dropped_fields.len();
    }

    fn record_failure(&mut self, account_id: String, err: &AppError) {
        self.failed.push(FailedAccount {
            account_id,
            code: err.code().to_string(),
            message: err.message().to_string(),
            cause: err
                .cause()
                .map(|_| err.root_cause().code().to_string()),
        });
    }
}

enum AccountResult {
    Done { outcome: AccountOutcome, committed: bool },
    Failed { account_id: String, error: AppError },
}

/// Runs every legacy account through reconciliation and commits each one on
/// its own. One account failing never stops the others.
pub struct MigrationDriver {
    store: Arc<dyn LegacyStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    slugs: Arc<dyn SlugSource>,
    writer: Arc<dyn BatchWriter>,
    concurrency: usize,
    dry_run: bool,
}

impl MigrationDriver {
    pub fn new(
        store: Arc<dyn LegacyStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        slugs: Arc<dyn SlugSource>,
        writer: Arc<dyn BatchWriter>,
    ) -> Self {
        Self {
            store,
            fetcher,
            slugs,
            writer,
            concurrency: 1,
            dry_run: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Fails only when the account list itself cannot be read.
    pub async fn run(&self) -> AppResult<MigrationReport> {
        let accounts = self.store.list_accounts().await?;
        info!(
            target: "sysmigrate",
            event = "run_start",
            accounts = accounts.len(),
            concurrency = self.concurrency,
            dry_run = self.dry_run
        );

        let results: Vec<AccountResult> = stream::iter(accounts)
            .map(|account| self.process(account))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = MigrationReport {
            dry_run: self.dry_run,
            ..MigrationReport::default()
        };
        for result in results {
            report.processed += 1;
            match result {
                AccountResult::Done { outcome, committed } => {
                    report.record_outcome(&outcome);
                    if committed {
                        report.committed += 1;
                    }
                }
                AccountResult::Failed { account_id, error } => {
                    report.record_failure(account_id, &error);
                }
            }
        }
        report
            .failed
            .sort_by(|a, b| a.account_id.cmp(&b.account_id));

        info!(
            target: "sysmigrate",
            event = "run_complete",
            processed = report.processed,
            committed = report.committed,
            failed = report.failed.len(),
            credentials_revoked = report.credentials_revoked,
            dry_run = report.dry_run
        );
        Ok(report)
    }

    /// Fetch, merge and commit for one account, run to completion.
    async fn process(&self, account: LegacyAccount) -> AccountResult {
        let account_id = account.id.clone();
        let reconciler = Reconciler::new(
            self.store.as_ref(),
            self.fetcher.as_ref(),
            self.slugs.as_ref(),
        );

        let outcome = match reconciler.reconcile(account).await {
            Ok(outcome) => outcome,
            Err(error) => {
                error!(
                    target: "sysmigrate",
                    event = "account_reconcile_failed",
                    account_id = %account_id,
                    code = %error.code(),
                    error = %error
                );
                return AccountResult::Failed { account_id, error };
            }
        };

        if self.dry_run {
            return AccountResult::Done {
                outcome,
                committed: false,
            };
        }

        match self.writer.commit(&outcome).await {
            Ok(()) => {
                info!(
                    target: "sysmigrate",
                    event = "account_committed",
                    account_id = %account_id,
                    has_system = outcome.system.is_some(),
                    members = outcome.members().len(),
                    fields = outcome.fields().len(),
                    revoked = outcome.revoked
                );
                AccountResult::Done {
                    outcome,
                    committed: true,
                }
            }
            Err(error) => {
                error!(
                    target: "sysmigrate",
                    event = "account_commit_failed",
                    account_id = %account_id,
                    code = %error.code(),
                    error = %error
                );
                AccountResult::Failed { account_id, error }
            }
        }
    }
}
