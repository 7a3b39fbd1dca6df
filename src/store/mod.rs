//! Persistent store
//!
//! The repository is the only owner of proposals, votes, content records
//! and migration reports. It holds no business rules, but it is the
//! serialization point for the uniqueness constraints the engine relies on.

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

use crate::governance::models::{
    Category, ContentRecord, MigrationResult, Proposal, ProposalStatus, Vote,
};
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

/// One vote per (proposal, voter)
pub const VOTE_UNIQUE: &str = "proposal_votes_proposal_voter_key";
/// Display order is unique within a (level, category) bucket
pub const CONTENT_ORDER_UNIQUE: &str = "content_records_bucket_order_key";
/// A legacy slug is migrated at most once
pub const CONTENT_EXTERNAL_KEY_UNIQUE: &str = "content_records_external_key_key";
/// A resolution must agree with the votes stored when it is written
pub const RESOLUTION_VOTES_CHECK: &str = "proposals_resolution_matches_votes";

/// Repository-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Unique-constraint violation, carries the constraint name
    #[error("unique constraint {0} violated")]
    Conflict(String),

    /// A conditional status update found a different stored status
    #[error("expected status {expected}, found {found}")]
    StaleState { expected: String, found: String },

    /// The store cannot be reached at all
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn is_conflict_on(&self, constraint: &str) -> bool {
        matches!(self, StoreError::Conflict(name) if name == constraint)
    }
}

/// Whether a status change is backed by the stored vote counts.
/// Approval needs every snapshot member approving and no reject on file.
/// Rejection needs at least one reject on file. Other moves are unchecked.
pub(crate) fn resolution_matches_votes(
    proposal: &Proposal,
    approve: usize,
    reject: usize,
) -> bool {
    match proposal.status {
        ProposalStatus::Approved => reject == 0 && approve == proposal.roster_size(),
        ProposalStatus::Rejected => reject > 0,
        _ => true,
    }
}

/// Proposal listing filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalFilter {
    pub status: Option<ProposalStatus>,
    pub author_id: Option<Uuid>,
    pub level: Option<u32>,
    pub category: Option<Category>,
}

impl ProposalFilter {
    pub fn with_status(status: ProposalStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, proposal: &Proposal) -> bool {
        self.status.map_or(true, |s| proposal.status == s)
            && self.author_id.map_or(true, |a| proposal.author_id == a)
            && self.level.map_or(true, |l| proposal.target_levels.contains(&l))
            && self.category.map_or(true, |c| proposal.category == c)
    }
}

/// Durable CRUD for the governance engine
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_proposal(&self, proposal: &Proposal) -> Result<(), StoreError>;

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, StoreError>;

    /// Newest first
    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>, StoreError>;

    /// Overwrite a proposal only if its stored status still equals `expected`.
    /// A status change to approved or rejected is also checked against the
    /// votes stored at write time, failing with a `RESOLUTION_VOTES_CHECK`
    /// conflict when they no longer support it.
    async fn update_proposal(
        &self,
        proposal: &Proposal,
        expected: ProposalStatus,
    ) -> Result<(), StoreError>;

    async fn delete_proposal(&self, id: Uuid) -> Result<(), StoreError>;

    /// Insert or overwrite the vote keyed by (proposal_id, voter_id).
    /// Fails with `StaleState` if the proposal is no longer pending.
    /// Returns the stored row, which keeps the original vote id.
    async fn upsert_vote(&self, vote: &Vote) -> Result<Vote, StoreError>;

    /// Ordered by cast time
    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StoreError>;

    async fn create_content_record(&self, record: &ContentRecord) -> Result<(), StoreError>;

    async fn get_max_display_order(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Option<u32>, StoreError>;

    async fn find_content_by_external_key(
        &self,
        key: &str,
    ) -> Result<Option<ContentRecord>, StoreError>;

    async fn find_content_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Vec<ContentRecord>, StoreError>;

    /// Ordered by display order
    async fn list_content(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Vec<ContentRecord>, StoreError>;

    async fn save_migration_result(&self, result: &MigrationResult) -> Result<(), StoreError>;

    async fn latest_migration_result(&self) -> Result<Option<MigrationResult>, StoreError>;
}
