//! Shared fixtures for governance tests

use crate::governance::models::{
    Actor, Category, ContentBlock, ContentRecord, LegacyModule, MigrationResult, NewProposal,
    Proposal, ProposalStatus, Reviewer, Vote, VoteValue,
};
use crate::store::{
    InMemoryRepository, ProposalFilter, Repository, StoreError, CONTENT_ORDER_UNIQUE,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub const MENTOR: u32 = 4;
pub const MAESTRO: u32 = 5;
pub const FOUNDER: u32 = 6;

pub fn actor(name: &str, level: u32) -> Actor {
    Actor {
        id: Uuid::new_v4(),
        name: name.to_string(),
        level,
    }
}

pub fn reviewers(names: &[&str]) -> Vec<Reviewer> {
    names
        .iter()
        .map(|name| Reviewer {
            id: Uuid::new_v4(),
            name: name.to_string(),
            level: MAESTRO,
        })
        .collect()
}

pub fn new_proposal(category: Category, target_levels: Vec<u32>) -> NewProposal {
    NewProposal {
        title: "Circle of fifths".to_string(),
        description: "Key relationships".to_string(),
        category,
        target_levels,
        blocks: vec![ContentBlock::Heading {
            text: "Fifths".to_string(),
            level: 1,
        }],
        estimated_minutes: 25,
    }
}

pub fn draft_proposal(category: Category, target_levels: Vec<u32>) -> Proposal {
    Proposal::new(new_proposal(category, target_levels), &actor("Author", MENTOR))
}

pub fn approved_proposal(category: Category, target_levels: Vec<u32>) -> Proposal {
    let mut proposal = draft_proposal(category, target_levels);
    proposal.status = ProposalStatus::Approved;
    proposal
}

pub fn ballot(
    proposal: &Proposal,
    reviewer: &Reviewer,
    value: VoteValue,
    comment: Option<&str>,
) -> Vote {
    Vote {
        id: Uuid::new_v4(),
        proposal_id: proposal.id,
        voter_id: reviewer.id,
        voter_name: reviewer.name.clone(),
        value,
        comment: comment.map(str::to_string),
        cast_at: Utc::now(),
    }
}

pub fn legacy_module(key: &str, level: u32, category: Category) -> LegacyModule {
    LegacyModule {
        external_key: key.to_string(),
        title: format!("Module {}", key),
        description: String::new(),
        level,
        category,
        estimated_minutes: 10,
        blocks: vec![ContentBlock::Paragraph {
            text: "Legacy body".to_string(),
        }],
        checkpoints: vec![],
    }
}

/// Twelve modules spread over three levels and both categories
pub fn legacy_catalog() -> Vec<LegacyModule> {
    (0..12)
        .map(|i| {
            let level = i % 3 + 1;
            let (category, kind) = if i % 2 == 0 {
                (Category::Theoretical, "teoria")
            } else {
                (Category::Practical, "pratica")
            };
            legacy_module(&format!("nivel-{}/{}/modulo-{}", level, kind, i), level, category)
        })
        .collect()
}

/// In-memory repository with injectable faults
#[derive(Default)]
pub struct FlakyRepository {
    inner: InMemoryRepository,
    /// Remaining display-order conflicts to inject
    conflicts: AtomicU32,
    injected: AtomicU32,
    outage: AtomicBool,
    /// Stored right after the next vote listing is read
    late_vote: Mutex<Option<Vote>>,
}

impl FlakyRepository {
    pub fn new(conflicts: u32) -> Self {
        Self {
            conflicts: AtomicU32::new(conflicts),
            ..Default::default()
        }
    }

    pub fn injected_conflicts(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    /// Land `vote` between the next tally read and the resolution write
    pub fn vote_after_next_read(&self, vote: Vote) {
        *self.late_vote.lock().unwrap() = Some(vote);
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for FlakyRepository {
    async fn create_proposal(&self, proposal: &Proposal) -> Result<(), StoreError> {
        self.check()?;
        self.inner.create_proposal(proposal).await
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, StoreError> {
        self.check()?;
        self.inner.get_proposal(id).await
    }

    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>, StoreError> {
        self.check()?;
        self.inner.list_proposals(filter).await
    }

    async fn update_proposal(
        &self,
        proposal: &Proposal,
        expected: ProposalStatus,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_proposal(proposal, expected).await
    }

    async fn delete_proposal(&self, id: Uuid) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_proposal(id).await
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<Vote, StoreError> {
        self.check()?;
        self.inner.upsert_vote(vote).await
    }

    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StoreError> {
        self.check()?;
        let votes = self.inner.list_votes(proposal_id).await?;
        let late = self.late_vote.lock().unwrap().take();
        if let Some(vote) = late {
            self.inner.upsert_vote(&vote).await?;
        }
        Ok(votes)
    }

    async fn create_content_record(&self, record: &ContentRecord) -> Result<(), StoreError> {
        self.check()?;
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict(CONTENT_ORDER_UNIQUE.to_string()));
        }
        self.inner.create_content_record(record).await
    }

    async fn get_max_display_order(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Option<u32>, StoreError> {
        self.check()?;
        self.inner.get_max_display_order(level, category).await
    }

    async fn find_content_by_external_key(
        &self,
        key: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        self.check()?;
        self.inner.find_content_by_external_key(key).await
    }

    async fn find_content_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        self.check()?;
        self.inner.find_content_by_proposal(proposal_id).await
    }

    async fn list_content(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        self.check()?;
        self.inner.list_content(level, category).await
    }

    async fn save_migration_result(&self, result: &MigrationResult) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_migration_result(result).await
    }

    async fn latest_migration_result(&self) -> Result<Option<MigrationResult>, StoreError> {
        self.check()?;
        self.inner.latest_migration_result().await
    }
}
