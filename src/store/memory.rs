//! In-memory repository
//!
//! Thread-safe store used when no database is configured, and by tests.
//! Enforces the same uniqueness constraints as the SQL schema.

use super::{
    resolution_matches_votes, ProposalFilter, Repository, StoreError,
    CONTENT_EXTERNAL_KEY_UNIQUE, CONTENT_ORDER_UNIQUE, RESOLUTION_VOTES_CHECK,
};
use crate::governance::models::{
    Category, ContentRecord, MigrationResult, Proposal, ProposalStatus, Vote, VoteValue,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    proposals: HashMap<Uuid, Proposal>,
    /// Keyed by (proposal_id, voter_id)
    votes: HashMap<(Uuid, Uuid), Vote>,
    content: Vec<ContentRecord>,
    migrations: Vec<MigrationResult>,
}

/// Thread-safe in-memory repository
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_proposal(&self, proposal: &Proposal) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.proposals.contains_key(&proposal.id) {
            return Err(StoreError::Conflict("proposals_pkey".to_string()));
        }
        state.proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, StoreError> {
        let state = self.state.read().await;
        Ok(state.proposals.get(&id).cloned())
    }

    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>, StoreError> {
        let state = self.state.read().await;
        let mut proposals: Vec<Proposal> = state
            .proposals
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        proposals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(proposals)
    }

    async fn update_proposal(
        &self,
        proposal: &Proposal,
        expected: ProposalStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let found = state
            .proposals
            .get(&proposal.id)
            .map(|p| p.status)
            .ok_or_else(|| StoreError::NotFound(format!("Proposal {}", proposal.id)))?;

        if found != expected {
            return Err(StoreError::StaleState {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        // Votes cannot change while the write lock is held
        if proposal.status != expected {
            let (approve, reject) = state
                .votes
                .iter()
                .filter(|((proposal_id, _), _)| *proposal_id == proposal.id)
                .fold((0, 0), |(a, r), (_, v)| match v.value {
                    VoteValue::Approve => (a + 1, r),
                    VoteValue::Reject => (a, r + 1),
                    VoteValue::Abstain => (a, r),
                });
            if !resolution_matches_votes(proposal, approve, reject) {
                return Err(StoreError::Conflict(RESOLUTION_VOTES_CHECK.to_string()));
            }
        }

        state.proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn delete_proposal(&self, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .proposals
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("Proposal {}", id)))?;
        state.votes.retain(|(proposal_id, _), _| *proposal_id != id);
        // Mirrors ON DELETE SET NULL on content_records.proposal_id
        for record in state.content.iter_mut() {
            if record.proposal_id == Some(id) {
                record.proposal_id = None;
            }
        }
        Ok(())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<Vote, StoreError> {
        let mut state = self.state.write().await;
        let status = state
            .proposals
            .get(&vote.proposal_id)
            .map(|p| p.status)
            .ok_or_else(|| StoreError::NotFound(format!("Proposal {}", vote.proposal_id)))?;

        if status != ProposalStatus::Pending {
            return Err(StoreError::StaleState {
                expected: ProposalStatus::Pending.to_string(),
                found: status.to_string(),
            });
        }

        let key = (vote.proposal_id, vote.voter_id);
        let stored = match state.votes.get(&key) {
            // Last value wins, the row identity stays
            Some(existing) => Vote {
                id: existing.id,
                ..vote.clone()
            },
            None => vote.clone(),
        };
        state.votes.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StoreError> {
        let state = self.state.read().await;
        let mut votes: Vec<Vote> = state
            .votes
            .values()
            .filter(|v| v.proposal_id == proposal_id)
            .cloned()
            .collect();
        votes.sort_by(|a, b| a.cast_at.cmp(&b.cast_at));
        Ok(votes)
    }

    async fn create_content_record(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        let order_taken = state.content.iter().any(|c| {
            c.level == record.level
                && c.category == record.category
                && c.display_order == record.display_order
        });
        if order_taken {
            return Err(StoreError::Conflict(CONTENT_ORDER_UNIQUE.to_string()));
        }

        if let Some(key) = &record.external_key {
            if state.content.iter().any(|c| c.external_key.as_ref() == Some(key)) {
                return Err(StoreError::Conflict(CONTENT_EXTERNAL_KEY_UNIQUE.to_string()));
            }
        }

        state.content.push(record.clone());
        Ok(())
    }

    async fn get_max_display_order(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Option<u32>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .content
            .iter()
            .filter(|c| c.level == level && c.category == category)
            .map(|c| c.display_order)
            .max())
    }

    async fn find_content_by_external_key(
        &self,
        key: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .content
            .iter()
            .find(|c| c.external_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_content_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .content
            .iter()
            .filter(|c| c.proposal_id == Some(proposal_id))
            .cloned()
            .collect())
    }

    async fn list_content(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<ContentRecord> = state
            .content
            .iter()
            .filter(|c| c.level == level && c.category == category)
            .cloned()
            .collect();
        records.sort_by_key(|c| c.display_order);
        Ok(records)
    }

    async fn save_migration_result(&self, result: &MigrationResult) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.migrations.push(result.clone());
        Ok(())
    }

    async fn latest_migration_result(&self) -> Result<Option<MigrationResult>, StoreError> {
        let state = self.state.read().await;
        Ok(state.migrations.last().cloned())
    }
}
