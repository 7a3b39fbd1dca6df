//! Migration orchestrator
//!
//! Imports the legacy static catalog as governed content. Each module is
//! keyed by its legacy slug, so a rerun skips what is already there.
//! Items commit independently. An item whose content fails to publish has
//! its proposal removed again; finished items stay on cancel or failure.

use crate::error::AppError;
use crate::governance::models::{
    Actor, Category, LegacyModule, MigratedCheckpoint, MigratedModule, MigrationIssue,
    MigrationResult, Proposal,
};
use crate::governance::publisher::ContentPublisher;
use crate::store::{Repository, StoreError, CONTENT_EXTERNAL_KEY_UNIQUE};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

static SLUG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[-_/][a-z0-9]+)*$").expect("slug pattern is a valid regex")
});

/// Whether `key` is a well-formed legacy slug
pub fn is_valid_external_key(key: &str) -> bool {
    SLUG_PATTERN.is_match(key)
}

const ALREADY_MIGRATED: &str = "already migrated";

enum ItemOutcome {
    Created(MigratedModule),
    Skipped,
}

/// Only an unreachable store aborts a run
fn is_fatal(err: &AppError) -> bool {
    matches!(err, AppError::Store(StoreError::Unavailable(_)))
}

/// Batch importer, one run at a time per process
#[derive(Clone)]
pub struct MigrationOrchestrator {
    repo: Arc<dyn Repository>,
    publisher: ContentPublisher,
    run_guard: Arc<Mutex<()>>,
}

impl MigrationOrchestrator {
    pub fn new(repo: Arc<dyn Repository>, publisher: ContentPublisher) -> Self {
        Self {
            repo,
            publisher,
            run_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Import every module not yet present, then persist the report.
    ///
    /// Fails fast with `MigrationInProgress` if another run holds the guard.
    /// A `true` on `cancel` stops the run before the next module; the
    /// partial report is still returned and persisted.
    pub async fn migrate_all(
        &self,
        modules: &[LegacyModule],
        author: &Actor,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationResult, AppError> {
        let _guard = self
            .run_guard
            .try_lock()
            .map_err(|_| AppError::MigrationInProgress)?;

        let mut result = MigrationResult::start();
        info!(
            run_id = %result.run_id,
            modules = modules.len(),
            author = %author.name,
            "Migration started"
        );

        for (index, module) in modules.iter().enumerate() {
            if cancel.as_ref().map_or(false, |rx| *rx.borrow()) {
                result.cancelled = true;
                result.warnings.push(MigrationIssue {
                    external_key: None,
                    message: format!("Cancelled after {} of {} modules", index, modules.len()),
                });
                warn!(run_id = %result.run_id, processed = index, "Migration cancelled");
                break;
            }

            match self.migrate_one(module, author).await {
                Ok(ItemOutcome::Created(migrated)) => {
                    result.total_estimated_minutes += u64::from(migrated.estimated_minutes);
                    result
                        .checkpoints
                        .extend(module.checkpoints.iter().map(|c| MigratedCheckpoint {
                            module_key: module.external_key.clone(),
                            title: c.title.clone(),
                        }));
                    match module.category {
                        Category::Theoretical => result.theoretical_modules.push(migrated),
                        Category::Practical => result.practical_modules.push(migrated),
                    }
                }
                Ok(ItemOutcome::Skipped) => {
                    warn!(external_key = %module.external_key, "Module already migrated, skipping");
                    result
                        .warnings
                        .push(MigrationIssue::new(&module.external_key, ALREADY_MIGRATED));
                }
                Err(e) if is_fatal(&e) => {
                    error!(
                        run_id = %result.run_id,
                        external_key = %module.external_key,
                        error = %e,
                        "Store unavailable, aborting migration"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        external_key = %module.external_key,
                        error = %e,
                        "Module failed to migrate"
                    );
                    result
                        .errors
                        .push(MigrationIssue::new(&module.external_key, e.to_string()));
                }
            }
        }

        result.finish();
        self.repo.save_migration_result(&result).await?;

        info!(
            run_id = %result.run_id,
            created = result.created_count(),
            checkpoints = result.checkpoints.len(),
            warnings = result.warnings.len(),
            errors = result.errors.len(),
            success = result.success,
            "Migration finished"
        );
        Ok(result)
    }

    async fn migrate_one(
        &self,
        module: &LegacyModule,
        author: &Actor,
    ) -> Result<ItemOutcome, AppError> {
        let key = module.external_key.as_str();
        if !is_valid_external_key(key) {
            return Err(AppError::Validation(format!("'{}' is not a valid slug", key)));
        }
        if module.title.trim().is_empty() {
            return Err(AppError::Validation("title is empty".to_string()));
        }
        if module.level == 0 {
            return Err(AppError::Validation("level must be at least 1".to_string()));
        }

        if self.repo.find_content_by_external_key(key).await?.is_some() {
            return Ok(ItemOutcome::Skipped);
        }

        let proposal = Proposal::imported(module.to_new_proposal(), author);
        self.repo.create_proposal(&proposal).await?;

        let record = match self.publisher.publish_imported(&proposal, key).await {
            Ok(record) => record,
            Err(e) => {
                self.discard(&proposal).await;
                return match e {
                    // Another process imported the same slug first
                    AppError::Store(ref s) if s.is_conflict_on(CONTENT_EXTERNAL_KEY_UNIQUE) => {
                        Ok(ItemOutcome::Skipped)
                    }
                    e => Err(e),
                };
            }
        };

        debug!(
            external_key = %key,
            proposal_id = %proposal.id,
            checkpoints = proposal.checkpoint_count(),
            display_order = record.display_order,
            "Module imported"
        );

        Ok(ItemOutcome::Created(MigratedModule {
            external_key: module.external_key.clone(),
            title: record.title,
            level: record.level,
            proposal_id: proposal.id,
            content_id: record.id,
            display_order: record.display_order,
            estimated_minutes: record.estimated_minutes,
        }))
    }

    /// Remove the proposal of an import whose content never landed
    async fn discard(&self, proposal: &Proposal) {
        if let Err(e) = self.repo.delete_proposal(proposal.id).await {
            warn!(
                proposal_id = %proposal.id,
                error = %e,
                "Could not remove proposal of failed import"
            );
        }
    }
}
