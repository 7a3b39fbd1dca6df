//! Roster provider seam
//!
//! The engine never looks at a live roster during voting; it asks for one
//! exactly once, when a proposal is submitted.

use crate::error::AppError;
use crate::governance::models::Reviewer;
use crate::governance::permissions::PermissionOracle;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Source of currently active reviewers
#[async_trait]
pub trait RosterProvider: Send + Sync {
    async fn active_reviewers(&self) -> Result<Vec<Reviewer>, AppError>;
}

/// Roster held in process, seeded from configuration
#[derive(Default)]
pub struct StaticRoster {
    reviewers: RwLock<Vec<Reviewer>>,
}

impl StaticRoster {
    pub fn new(reviewers: Vec<Reviewer>) -> Self {
        Self {
            reviewers: RwLock::new(reviewers),
        }
    }

    #[cfg(test)]
    pub async fn replace(&self, reviewers: Vec<Reviewer>) {
        *self.reviewers.write().await = reviewers;
    }
}

#[async_trait]
impl RosterProvider for StaticRoster {
    async fn active_reviewers(&self) -> Result<Vec<Reviewer>, AppError> {
        Ok(self.reviewers.read().await.clone())
    }
}

/// Voters eligible at this instant: Maestro level only, one entry per id
pub fn snapshot(reviewers: Vec<Reviewer>, oracle: &PermissionOracle) -> Vec<Reviewer> {
    let mut seen = HashSet::new();
    reviewers
        .into_iter()
        .filter(|r| oracle.can_vote(r.level))
        .filter(|r| seen.insert(r.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::testing::{reviewers, MAESTRO, MENTOR};
    use uuid::Uuid;

    fn oracle() -> PermissionOracle {
        PermissionOracle::new(MAESTRO, vec![MENTOR, MAESTRO], vec![6], vec![])
    }

    #[test]
    fn test_snapshot_keeps_only_voters_once() {
        let mut roster = reviewers(&["A", "B"]);
        roster.push(roster[0].clone());
        roster.push(Reviewer {
            id: Uuid::new_v4(),
            name: "Mentor".to_string(),
            level: MENTOR,
        });

        let snap = snapshot(roster.clone(), &oracle());
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0], roster[0]);
        assert_eq!(snap[1], roster[1]);
    }

    #[tokio::test]
    async fn test_static_roster_replace() {
        let provider = StaticRoster::new(reviewers(&["A"]));
        assert_eq!(provider.active_reviewers().await.unwrap().len(), 1);

        provider.replace(reviewers(&["B", "C"])).await;
        let names: Vec<String> = provider
            .active_reviewers()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["B", "C"]);
    }
}
