//! Content publisher
//!
//! Turns an approved proposal into published content records, one per
//! target level, appended at the end of their (level, category) bucket.

use crate::error::AppError;
use crate::governance::models::{ContentRecord, ContentSource, Proposal, ProposalStatus};
use crate::store::{Repository, CONTENT_ORDER_UNIQUE};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Display order and initial lock state for the next item in a bucket.
/// The first item is open; everything after waits for its predecessor.
pub fn next_slot(current_max: Option<u32>) -> (u32, bool) {
    match current_max {
        None => (1, false),
        Some(max) => (max + 1, true),
    }
}

/// Writes content records for approved proposals
#[derive(Clone)]
pub struct ContentPublisher {
    repo: Arc<dyn Repository>,
    /// Extra attempts after a display-order conflict
    max_retries: u32,
}

impl ContentPublisher {
    pub fn new(repo: Arc<dyn Repository>, max_retries: u32) -> Self {
        Self { repo, max_retries }
    }

    /// Publish an approved proposal to every target level
    pub async fn publish(&self, proposal: &Proposal) -> Result<Vec<ContentRecord>, AppError> {
        self.publish_as(proposal, ContentSource::Proposal, None).await
    }

    /// Publish a synthesized import proposal under its legacy key
    pub async fn publish_imported(
        &self,
        proposal: &Proposal,
        external_key: &str,
    ) -> Result<ContentRecord, AppError> {
        let records = self
            .publish_as(proposal, ContentSource::Migration, Some(external_key))
            .await?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal(format!("No record published for {}", external_key)))
    }

    async fn publish_as(
        &self,
        proposal: &Proposal,
        source: ContentSource,
        external_key: Option<&str>,
    ) -> Result<Vec<ContentRecord>, AppError> {
        if proposal.status != ProposalStatus::Approved {
            return Err(AppError::InvalidState(format!(
                "Cannot publish proposal {} with status {}",
                proposal.id, proposal.status
            )));
        }
        if proposal.target_levels.is_empty() {
            return Err(AppError::Validation(format!(
                "Proposal {} has no target level",
                proposal.id
            )));
        }

        // Re-publishing returns what is already there
        let existing = self.repo.find_content_by_proposal(proposal.id).await?;

        let mut records = Vec::with_capacity(proposal.target_levels.len());
        for &level in &proposal.target_levels {
            if let Some(record) = existing.iter().find(|r| r.level == level) {
                records.push(record.clone());
                continue;
            }
            records.push(self.publish_level(proposal, level, source, external_key).await?);
        }

        Ok(records)
    }

    async fn publish_level(
        &self,
        proposal: &Proposal,
        level: u32,
        source: ContentSource,
        external_key: Option<&str>,
    ) -> Result<ContentRecord, AppError> {
        let mut attempt = 0;
        loop {
            let current_max = self
                .repo
                .get_max_display_order(level, proposal.category)
                .await?;
            let (display_order, locked) = next_slot(current_max);

            let record = ContentRecord {
                id: Uuid::new_v4(),
                proposal_id: Some(proposal.id),
                external_key: external_key.map(str::to_string),
                title: proposal.title.clone(),
                description: proposal.description.clone(),
                level,
                category: proposal.category,
                display_order,
                locked,
                estimated_minutes: proposal.estimated_minutes,
                source,
                published_at: Utc::now(),
            };

            match self.repo.create_content_record(&record).await {
                Ok(()) => {
                    info!(
                        proposal_id = %proposal.id,
                        content_id = %record.id,
                        target_level = level,
                        category = %proposal.category,
                        display_order,
                        locked,
                        "Content published"
                    );
                    return Ok(record);
                }
                Err(e) if e.is_conflict_on(CONTENT_ORDER_UNIQUE) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(AppError::DuplicateOrder {
                            level,
                            category: proposal.category.to_string(),
                            order: display_order,
                        });
                    }
                    warn!(
                        proposal_id = %proposal.id,
                        target_level = level,
                        display_order,
                        attempt,
                        "Display order taken by a concurrent publish, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::models::Category;
    use crate::governance::models::Proposal;
    use crate::governance::testing::{approved_proposal, FlakyRepository};
    use crate::store::InMemoryRepository;
    use proptest::prelude::*;

    #[test]
    fn test_first_slot_is_unlocked() {
        assert_eq!(next_slot(None), (1, false));
        assert_eq!(next_slot(Some(1)), (2, true));
        assert_eq!(next_slot(Some(7)), (8, true));
    }

    #[tokio::test]
    async fn test_publish_appends_to_bucket() {
        let repo = Arc::new(InMemoryRepository::new());
        let publisher = ContentPublisher::new(repo.clone(), 3);

        let first = publisher
            .publish(&approved_proposal(Category::Theoretical, vec![1]))
            .await
            .unwrap();
        let second = publisher
            .publish(&approved_proposal(Category::Theoretical, vec![1]))
            .await
            .unwrap();
        let other_bucket = publisher
            .publish(&approved_proposal(Category::Practical, vec![1]))
            .await
            .unwrap();

        assert_eq!((first[0].display_order, first[0].locked), (1, false));
        assert_eq!((second[0].display_order, second[0].locked), (2, true));
        assert_eq!((other_bucket[0].display_order, other_bucket[0].locked), (1, false));
        assert_eq!(first[0].source, ContentSource::Proposal);
    }

    #[tokio::test]
    async fn test_one_record_per_target_level() {
        let repo = Arc::new(InMemoryRepository::new());
        let publisher = ContentPublisher::new(repo.clone(), 3);
        let proposal = approved_proposal(Category::Practical, vec![2, 3]);

        let records = publisher.publish(&proposal).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, 2);
        assert_eq!(records[1].level, 3);
        assert!(records.iter().all(|r| r.proposal_id == Some(proposal.id)));
    }

    #[tokio::test]
    async fn test_publish_is_idempotent_per_proposal() {
        let repo = Arc::new(InMemoryRepository::new());
        let publisher = ContentPublisher::new(repo.clone(), 3);
        let proposal = approved_proposal(Category::Theoretical, vec![1]);

        let first = publisher.publish(&proposal).await.unwrap();
        let again = publisher.publish(&proposal).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(
            repo.list_content(1, Category::Theoretical).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejects_unapproved_proposal() {
        let repo = Arc::new(InMemoryRepository::new());
        let publisher = ContentPublisher::new(repo, 3);
        let mut proposal = approved_proposal(Category::Theoretical, vec![1]);
        proposal.status = ProposalStatus::Pending;

        let err = publisher.publish(&proposal).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_retries_order_conflict() {
        let flaky = Arc::new(FlakyRepository::new(2));
        let publisher = ContentPublisher::new(flaky.clone(), 3);

        let records = publisher
            .publish(&approved_proposal(Category::Theoretical, vec![1]))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(flaky.injected_conflicts(), 2);
    }

    #[tokio::test]
    async fn test_surfaces_duplicate_order_after_retries() {
        let flaky = Arc::new(FlakyRepository::new(10));
        let publisher = ContentPublisher::new(flaky.clone(), 2);

        let err = publisher
            .publish(&approved_proposal(Category::Theoretical, vec![4]))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DuplicateOrder { level: 4, order: 1, .. }));
        // One initial attempt plus two retries
        assert_eq!(flaky.injected_conflicts(), 3);
    }

    #[derive(Debug, Clone)]
    enum PublishOp {
        Publish(Category, Vec<u32>),
        /// Publish an earlier proposal again, by index modulo the count
        Republish(usize),
    }

    fn publish_ops() -> impl Strategy<Value = Vec<PublishOp>> {
        let category = prop_oneof![Just(Category::Theoretical), Just(Category::Practical)];
        proptest::collection::vec(
            prop_oneof![
                3 => (category, proptest::sample::subsequence(vec![1u32, 2, 3], 1..=3))
                    .prop_map(|(c, levels)| PublishOp::Publish(c, levels)),
                1 => any::<usize>().prop_map(PublishOp::Republish),
            ],
            0..16,
        )
    }

    proptest! {
        #[test]
        fn property_buckets_stay_dense_and_gated(ops in publish_ops()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let repo = Arc::new(InMemoryRepository::new());
                let publisher = ContentPublisher::new(repo.clone(), 3);
                let mut published: Vec<Proposal> = Vec::new();

                for op in ops {
                    match op {
                        PublishOp::Publish(category, levels) => {
                            let proposal = approved_proposal(category, levels);
                            let records = publisher.publish(&proposal).await.expect("publish");
                            assert_eq!(records.len(), proposal.target_levels.len());
                            published.push(proposal);
                        }
                        PublishOp::Republish(_) if published.is_empty() => {}
                        PublishOp::Republish(index) => {
                            let proposal = &published[index % published.len()];
                            let before = repo.find_content_by_proposal(proposal.id).await.unwrap();
                            let again = publisher.publish(proposal).await.expect("republish");
                            assert_eq!(again.len(), before.len());
                        }
                    }
                }

                for level in 1..=3 {
                    for category in [Category::Theoretical, Category::Practical] {
                        let bucket = repo.list_content(level, category).await.unwrap();
                        let expected = published
                            .iter()
                            .filter(|p| p.category == category && p.target_levels.contains(&level))
                            .count();
                        assert_eq!(bucket.len(), expected);
                        for (i, record) in bucket.iter().enumerate() {
                            assert_eq!(record.display_order, i as u32 + 1);
                            assert_eq!(record.locked, i > 0);
                        }
                    }
                }
            });
        }
    }
}
