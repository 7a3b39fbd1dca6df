//! Governance service
//!
//! Single entry point for every governance operation. Checks permissions
//! before any state-mutating call, then delegates to the engine parts.

use crate::config::GovernanceConfig;
use crate::error::{not_found_error, validation_error, AppError};
use crate::governance::migration::MigrationOrchestrator;
use crate::governance::models::{
    Actor, Category, ContentRecord, LegacyModule, MigrationResult, NewProposal, Proposal,
    ProposalPatch, ProposalStatus, ProposalView, Tally, VoteValue,
};
use crate::governance::permissions::PermissionOracle;
use crate::governance::publisher::ContentPublisher;
use crate::governance::roster::{self, RosterProvider};
use crate::governance::state_machine::ProposalStateMachine;
use crate::governance::tally::{VoteOutcome, VotingEngine};
use crate::store::{ProposalFilter, Repository, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Highest level a proposal may target
pub const MAX_LEVEL: u32 = 99;

#[derive(Clone)]
pub struct GovernanceService {
    repo: Arc<dyn Repository>,
    roster: Arc<dyn RosterProvider>,
    oracle: PermissionOracle,
    publisher: ContentPublisher,
    machine: ProposalStateMachine,
    voting: VotingEngine,
    migrator: MigrationOrchestrator,
}

impl GovernanceService {
    pub fn new(
        repo: Arc<dyn Repository>,
        roster: Arc<dyn RosterProvider>,
        config: &GovernanceConfig,
    ) -> Self {
        let oracle = PermissionOracle::from_config(config);
        let publisher = ContentPublisher::new(repo.clone(), config.publish_max_retries);
        let machine =
            ProposalStateMachine::new(repo.clone(), publisher.clone(), config.vote_deadline());
        let voting = VotingEngine::new(repo.clone(), machine.clone());
        let migrator = MigrationOrchestrator::new(repo.clone(), publisher.clone());

        Self {
            repo,
            roster,
            oracle,
            publisher,
            machine,
            voting,
            migrator,
        }
    }

    fn require_override(&self, actor: &Actor, action: &str) -> Result<(), AppError> {
        if self.oracle.has_override(actor.level, actor.id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "Only override holders may {}",
                action
            )))
        }
    }

    // ==================== Proposals ====================

    pub async fn create_proposal(
        &self,
        author: &Actor,
        draft: NewProposal,
    ) -> Result<Proposal, AppError> {
        if !self.oracle.can_propose(author.level) {
            return Err(AppError::Forbidden(format!(
                "Level {} cannot author proposals",
                author.level
            )));
        }
        if draft.title.trim().is_empty() {
            return Err(validation_error("Title cannot be empty"));
        }
        if draft.target_levels.is_empty() {
            return Err(validation_error("At least one target level is required"));
        }
        if let Some(bad) = draft
            .target_levels
            .iter()
            .find(|l| !(1..=MAX_LEVEL).contains(*l))
        {
            return Err(validation_error(format!(
                "Target level {} is outside 1..={}",
                bad, MAX_LEVEL
            )));
        }

        let proposal = Proposal::new(draft, author);
        self.repo.create_proposal(&proposal).await?;

        info!(
            proposal_id = %proposal.id,
            author_id = %author.id,
            category = %proposal.category,
            "Proposal created"
        );
        Ok(proposal)
    }

    pub async fn update_proposal(
        &self,
        requester: &Actor,
        id: Uuid,
        patch: ProposalPatch,
    ) -> Result<Proposal, AppError> {
        let mut proposal = self.machine.load(id).await?;
        if !self.oracle.can_edit_proposal(
            requester.level,
            proposal.author_id,
            requester.id,
            proposal.status,
        ) {
            return Err(AppError::Forbidden(format!(
                "Not allowed to edit proposal {}",
                id
            )));
        }
        if patch.is_empty() {
            return Err(validation_error("Nothing to update"));
        }
        if patch.title.as_deref().map_or(false, |t| t.trim().is_empty()) {
            return Err(validation_error("Title cannot be empty"));
        }

        let status = proposal.status;
        proposal.apply_patch(patch);
        match self.repo.update_proposal(&proposal, status).await {
            Ok(()) => {}
            Err(StoreError::StaleState { found, .. }) => {
                return Err(AppError::InvalidState(format!(
                    "Proposal {} changed to {} while editing",
                    id, found
                )));
            }
            Err(e) => return Err(e.into()),
        }

        info!(proposal_id = %id, editor_id = %requester.id, "Proposal updated");
        Ok(proposal)
    }

    pub async fn delete_proposal(&self, requester: &Actor, id: Uuid) -> Result<(), AppError> {
        let proposal = self.machine.load(id).await?;
        let votes = self.repo.list_votes(id).await?;
        if !self.oracle.can_delete_proposal(
            requester.level,
            proposal.author_id,
            requester.id,
            proposal.status,
            votes.len(),
        ) {
            return Err(AppError::Forbidden(format!(
                "Not allowed to delete proposal {}",
                id
            )));
        }

        self.repo.delete_proposal(id).await?;
        info!(proposal_id = %id, requester_id = %requester.id, "Proposal deleted");
        Ok(())
    }

    /// Author or override holder sends a draft to the current Maestros
    pub async fn submit_proposal(&self, requester: &Actor, id: Uuid) -> Result<Proposal, AppError> {
        let proposal = self.machine.load(id).await?;
        if proposal.author_id != requester.id && !self.oracle.has_override(requester.level, requester.id)
        {
            return Err(AppError::Forbidden(format!(
                "Only the author may submit proposal {}",
                id
            )));
        }

        let active = self.roster.active_reviewers().await?;
        let snapshot = roster::snapshot(active, &self.oracle);
        self.machine.submit(id, snapshot).await
    }

    pub async fn cast_vote(
        &self,
        voter: &Actor,
        id: Uuid,
        value: VoteValue,
        comment: Option<String>,
    ) -> Result<VoteOutcome, AppError> {
        if !self.oracle.can_vote(voter.level) {
            return Err(AppError::Forbidden(format!(
                "Level {} cannot vote",
                voter.level
            )));
        }
        self.voting
            .cast_vote(id, voter.id, &voter.name, value, comment)
            .await
    }

    pub async fn get_proposal(&self, id: Uuid) -> Result<ProposalView, AppError> {
        let proposal = self.machine.load(id).await?;
        let proposal = self.machine.refresh(proposal, Utc::now()).await?;
        let votes = self.repo.list_votes(id).await?;
        let tally = Tally::from_votes(&votes, proposal.roster_size());

        Ok(ProposalView {
            proposal,
            votes,
            tally,
        })
    }

    pub async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>, AppError> {
        let now = Utc::now();
        let mut proposals = Vec::new();
        for proposal in self.repo.list_proposals(filter).await? {
            let proposal = self.machine.refresh(proposal, now).await?;
            // Expiry may have moved it out of the requested status
            if filter.matches(&proposal) {
                proposals.push(proposal);
            }
        }
        Ok(proposals)
    }

    /// Expire every overdue pending proposal, returning the expired ids
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let pending = self
            .repo
            .list_proposals(&ProposalFilter::with_status(ProposalStatus::Pending))
            .await?;

        let mut expired = Vec::new();
        for proposal in pending {
            match self.machine.expire_if_overdue(proposal.id, now).await {
                Ok(ProposalStatus::Expired) => expired.push(proposal.id),
                Ok(_) => {}
                Err(AppError::AlreadyResolved(_)) | Err(AppError::InvalidState(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired overdue proposals");
        }
        Ok(expired)
    }

    pub async fn expire_overdue(
        &self,
        requester: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        self.require_override(requester, "run the expiry sweep")?;
        self.sweep_expired(now).await
    }

    /// Fill in missing content records for an approved proposal
    pub async fn republish(
        &self,
        requester: &Actor,
        id: Uuid,
    ) -> Result<Vec<ContentRecord>, AppError> {
        self.require_override(requester, "republish content")?;
        let proposal = self.machine.load(id).await?;
        let records = self.publisher.publish(&proposal).await?;
        info!(proposal_id = %id, records = records.len(), "Proposal republished");
        Ok(records)
    }

    // ==================== Content ====================

    pub async fn list_published(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Vec<ContentRecord>, AppError> {
        Ok(self.repo.list_content(level, category).await?)
    }

    // ==================== Migration ====================

    pub async fn migrate_all(
        &self,
        requester: &Actor,
        modules: &[LegacyModule],
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationResult, AppError> {
        self.require_override(requester, "run migrations")?;
        if modules.is_empty() {
            warn!(requester_id = %requester.id, "Migration requested with an empty catalog");
        }
        self.migrator.migrate_all(modules, requester, cancel).await
    }

    pub async fn last_migration(&self) -> Result<MigrationResult, AppError> {
        self.repo
            .latest_migration_result()
            .await?
            .ok_or_else(|| not_found_error("No migration has run yet"))
    }
}
