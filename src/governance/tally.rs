//! Voting tally engine
//!
//! Veto unanimity: the first reject ends voting, and only approval by the
//! whole roster snapshot passes a proposal. Abstentions block approval
//! without rejecting.

use crate::error::AppError;
use crate::governance::models::{ContentRecord, ProposalStatus, Tally, Vote, VoteValue};
use crate::governance::state_machine::{ProposalStateMachine, Resolution};
use crate::store::{Repository, StoreError, RESOLUTION_VOTES_CHECK};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tally-and-commit rounds before a vote settles for pending
const RESOLVE_ATTEMPTS: u32 = 3;

/// Resolution implied by the current votes, if any
pub fn decide(votes: &[Vote], roster_size: usize) -> Option<Resolution> {
    let first_reject = votes
        .iter()
        .filter(|v| v.value == VoteValue::Reject)
        .min_by_key(|v| v.cast_at);
    if let Some(veto) = first_reject {
        return Some(Resolution::Rejected {
            reason: veto.comment.clone().unwrap_or_default(),
        });
    }

    let approvals = votes.iter().filter(|v| v.value == VoteValue::Approve).count();
    if roster_size > 0 && approvals == roster_size {
        return Some(Resolution::Approved);
    }

    None
}

/// Result of a single vote
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub status: ProposalStatus,
    pub tally: Tally,
    pub vote: Vote,
    /// Records written if this vote approved the proposal
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub published: Vec<ContentRecord>,
}

/// Records votes and drives resolution
#[derive(Clone)]
pub struct VotingEngine {
    repo: Arc<dyn Repository>,
    machine: ProposalStateMachine,
}

impl VotingEngine {
    pub fn new(repo: Arc<dyn Repository>, machine: ProposalStateMachine) -> Self {
        Self { repo, machine }
    }

    pub async fn cast_vote(
        &self,
        proposal_id: Uuid,
        voter_id: Uuid,
        voter_name: &str,
        value: VoteValue,
        comment: Option<String>,
    ) -> Result<VoteOutcome, AppError> {
        let proposal = self.machine.load(proposal_id).await?;
        let proposal = self.machine.refresh(proposal, Utc::now()).await?;

        if !proposal.in_roster(voter_id) {
            return Err(AppError::NotEligible(voter_id.to_string()));
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(AppError::InvalidTransition(format!(
                "Proposal {} is {}, votes are closed",
                proposal_id, proposal.status
            )));
        }

        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if value == VoteValue::Reject && comment.is_none() {
            return Err(AppError::MissingReason);
        }

        let vote = Vote {
            id: Uuid::new_v4(),
            proposal_id,
            voter_id,
            voter_name: voter_name.to_string(),
            value,
            comment,
            cast_at: Utc::now(),
        };
        let vote = match self.repo.upsert_vote(&vote).await {
            Ok(stored) => stored,
            Err(StoreError::StaleState { found, .. }) => {
                return Err(AppError::InvalidTransition(format!(
                    "Proposal {} is {}, votes are closed",
                    proposal_id, found
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let roster_size = proposal.roster_size();
        for attempt in 1..=RESOLVE_ATTEMPTS {
            let votes = self.repo.list_votes(proposal_id).await?;
            let tally = Tally::from_votes(&votes, roster_size);
            debug!(
                proposal_id = %proposal_id,
                voter_id = %voter_id,
                value = value.as_str(),
                approve = tally.approve,
                reject = tally.reject,
                abstain = tally.abstain,
                roster_size = tally.roster_size,
                attempt,
                "Vote recorded"
            );

            let Some(resolution) = decide(&votes, roster_size) else {
                return Ok(VoteOutcome {
                    status: ProposalStatus::Pending,
                    tally,
                    vote,
                    published: Vec::new(),
                });
            };

            match self.machine.resolve(proposal.clone(), &resolution).await {
                Ok(resolved) => {
                    info!(
                        proposal_id = %proposal_id,
                        status = %resolved.proposal.status,
                        published = resolved.published.len(),
                        "Voting closed"
                    );
                    return Ok(VoteOutcome {
                        status: resolved.proposal.status,
                        tally,
                        vote,
                        published: resolved.published,
                    });
                }
                // A concurrent vote already committed the resolution
                Err(AppError::AlreadyResolved(_)) => {
                    let current = self.machine.load(proposal_id).await?;
                    let votes = self.repo.list_votes(proposal_id).await?;
                    return Ok(VoteOutcome {
                        status: current.status,
                        tally: Tally::from_votes(&votes, roster_size),
                        vote,
                        published: Vec::new(),
                    });
                }
                // Votes moved between the tally and the write
                Err(AppError::Store(e)) if e.is_conflict_on(RESOLUTION_VOTES_CHECK) => {
                    warn!(
                        proposal_id = %proposal_id,
                        attempt,
                        "Votes changed during resolution, tallying again"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // Still pending; the vote that keeps moving the tally resolves it
        let votes = self.repo.list_votes(proposal_id).await?;
        Ok(VoteOutcome {
            status: ProposalStatus::Pending,
            tally: Tally::from_votes(&votes, roster_size),
            vote,
            published: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::models::{Category, Proposal, Reviewer};
    use crate::governance::publisher::ContentPublisher;
    use crate::governance::testing::{ballot, draft_proposal, reviewers, FlakyRepository};
    use crate::store::InMemoryRepository;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        engine: VotingEngine,
        proposal: Proposal,
        roster: Vec<Reviewer>,
    }

    async fn pending(names: &[&str]) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let publisher = ContentPublisher::new(repo.clone(), 3);
        let machine = ProposalStateMachine::new(repo.clone(), publisher, Duration::days(7));
        let engine = VotingEngine::new(repo.clone(), machine.clone());

        let draft = draft_proposal(Category::Theoretical, vec![2]);
        repo.create_proposal(&draft).await.unwrap();
        let roster = reviewers(names);
        let proposal = machine.submit(draft.id, roster.clone()).await.unwrap();

        Fixture {
            repo,
            engine,
            proposal,
            roster,
        }
    }

    impl Fixture {
        async fn vote(
            &self,
            voter: usize,
            value: VoteValue,
            comment: Option<&str>,
        ) -> Result<VoteOutcome, AppError> {
            let reviewer = &self.roster[voter];
            self.engine
                .cast_vote(
                    self.proposal.id,
                    reviewer.id,
                    &reviewer.name,
                    value,
                    comment.map(str::to_string),
                )
                .await
        }

        async fn status(&self) -> ProposalStatus {
            self.repo
                .get_proposal(self.proposal.id)
                .await
                .unwrap()
                .unwrap()
                .status
        }
    }

    #[tokio::test]
    async fn test_unanimous_approval_publishes() {
        let fx = pending(&["A", "B", "C"]).await;

        let a = fx.vote(0, VoteValue::Approve, None).await.unwrap();
        let b = fx.vote(1, VoteValue::Approve, None).await.unwrap();
        assert_eq!(a.status, ProposalStatus::Pending);
        assert_eq!(b.status, ProposalStatus::Pending);

        let c = fx.vote(2, VoteValue::Approve, None).await.unwrap();
        assert_eq!(c.status, ProposalStatus::Approved);
        assert_eq!(c.tally.approve, 3);
        assert_eq!(c.published.len(), 1);

        let content = fx.repo.list_content(2, Category::Theoretical).await.unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].proposal_id, Some(fx.proposal.id));
        assert!(!content[0].locked);

        let stored = fx.repo.get_proposal(fx.proposal.id).await.unwrap().unwrap();
        assert!(stored.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_single_reject_is_final() {
        let fx = pending(&["A", "B", "C"]).await;

        fx.vote(0, VoteValue::Approve, None).await.unwrap();
        let b = fx
            .vote(1, VoteValue::Reject, Some("duplicates module 3"))
            .await
            .unwrap();
        assert_eq!(b.status, ProposalStatus::Rejected);

        let stored = fx.repo.get_proposal(fx.proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.rejection_reason.as_deref(), Some("duplicates module 3"));

        let late = fx.vote(2, VoteValue::Approve, None).await.unwrap_err();
        assert!(matches!(late, AppError::InvalidTransition(_)));
        assert_eq!(fx.repo.list_votes(fx.proposal.id).await.unwrap().len(), 2);
        assert!(fx
            .repo
            .list_content(2, Category::Theoretical)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_voter_outside_snapshot_is_not_eligible() {
        let fx = pending(&["A", "B", "C"]).await;

        let err = fx
            .engine
            .cast_vote(fx.proposal.id, Uuid::new_v4(), "Z", VoteValue::Approve, None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotEligible(_)));
        assert_eq!(fx.status().await, ProposalStatus::Pending);
        assert!(fx.repo.list_votes(fx.proposal.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_without_comment_is_refused() {
        let fx = pending(&["A", "B"]).await;

        for comment in [None, Some(""), Some("   ")] {
            let err = fx.vote(0, VoteValue::Reject, comment).await.unwrap_err();
            assert!(matches!(err, AppError::MissingReason));
        }
        assert_eq!(fx.status().await, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn test_revote_overwrites_and_abstain_blocks_approval() {
        let fx = pending(&["A", "B"]).await;

        fx.vote(0, VoteValue::Abstain, None).await.unwrap();
        let b = fx.vote(1, VoteValue::Approve, None).await.unwrap();
        assert_eq!(b.status, ProposalStatus::Pending);
        assert_eq!(b.tally.abstain, 1);

        let a = fx.vote(0, VoteValue::Approve, None).await.unwrap();
        assert_eq!(a.status, ProposalStatus::Approved);
        assert_eq!(fx.repo.list_votes(fx.proposal.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_votes_never_exceed_roster() {
        let fx = pending(&["A", "B", "C", "D"]).await;

        for round in 0..3 {
            for voter in 0..3 {
                let value = if round % 2 == 0 {
                    VoteValue::Abstain
                } else {
                    VoteValue::Approve
                };
                fx.vote(voter, value, None).await.unwrap();
                let votes = fx.repo.list_votes(fx.proposal.id).await.unwrap();
                assert!(votes.len() <= fx.proposal.roster_size());
            }
        }
        assert_eq!(fx.status().await, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_final_votes_resolve_once() {
        let fx = pending(&["A", "B", "C"]).await;
        fx.vote(0, VoteValue::Approve, None).await.unwrap();

        let (b, c) = tokio::join!(
            fx.vote(1, VoteValue::Approve, None),
            fx.vote(2, VoteValue::Approve, None)
        );

        // The loser either joined the resolution or found voting closed
        for outcome in [b, c] {
            match outcome {
                Ok(o) => assert_ne!(o.status, ProposalStatus::Rejected),
                Err(e) => assert!(matches!(e, AppError::InvalidTransition(_))),
            }
        }
        assert_eq!(fx.status().await, ProposalStatus::Approved);
        assert_eq!(
            fx.repo
                .list_content(2, Category::Theoretical)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_vote_after_deadline_sees_expired() {
        let fx = pending(&["A"]).await;
        let mut overdue = fx.repo.get_proposal(fx.proposal.id).await.unwrap().unwrap();
        overdue.submitted_at = Some(Utc::now() - Duration::days(8));
        fx.repo
            .update_proposal(&overdue, ProposalStatus::Pending)
            .await
            .unwrap();

        let err = fx.vote(0, VoteValue::Approve, None).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        assert_eq!(fx.status().await, ProposalStatus::Expired);
    }

    #[tokio::test]
    async fn test_reject_landing_during_resolution_wins() {
        let repo = Arc::new(FlakyRepository::new(0));
        let publisher = ContentPublisher::new(repo.clone(), 3);
        let machine = ProposalStateMachine::new(repo.clone(), publisher, Duration::days(7));
        let engine = VotingEngine::new(repo.clone(), machine.clone());

        let draft = draft_proposal(Category::Theoretical, vec![2]);
        repo.create_proposal(&draft).await.unwrap();
        let roster = reviewers(&["A", "B"]);
        let proposal = machine.submit(draft.id, roster.clone()).await.unwrap();
        let (a, b) = (&roster[0], &roster[1]);

        engine
            .cast_vote(proposal.id, a.id, &a.name, VoteValue::Approve, None)
            .await
            .unwrap();

        // A switches to reject after B's tally read saw two approvals
        repo.vote_after_next_read(ballot(
            &proposal,
            a,
            VoteValue::Reject,
            Some("changed my mind"),
        ));
        let outcome = engine
            .cast_vote(proposal.id, b.id, &b.name, VoteValue::Approve, None)
            .await
            .unwrap();

        assert_eq!(outcome.status, ProposalStatus::Rejected);
        assert_eq!(outcome.tally.reject, 1);
        assert!(outcome.published.is_empty());

        let stored = repo.get_proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Rejected);
        assert_eq!(stored.rejection_reason.as_deref(), Some("changed my mind"));
        assert!(repo
            .list_content(2, Category::Theoretical)
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_decide_prefers_earliest_reject() {
        let proposal_id = Uuid::new_v4();
        let now = Utc::now();
        let vote = |value, comment: Option<&str>, offset| Vote {
            id: Uuid::new_v4(),
            proposal_id,
            voter_id: Uuid::new_v4(),
            voter_name: "M".to_string(),
            value,
            comment: comment.map(str::to_string),
            cast_at: now + Duration::seconds(offset),
        };
        let votes = vec![
            vote(VoteValue::Reject, Some("second"), 5),
            vote(VoteValue::Approve, None, 0),
            vote(VoteValue::Reject, Some("first"), 1),
        ];

        assert_eq!(
            decide(&votes, 3),
            Some(Resolution::Rejected {
                reason: "first".to_string()
            })
        );
        assert_eq!(decide(&votes[1..2], 1), Some(Resolution::Approved));
        assert_eq!(decide(&votes[1..2], 2), None);
        assert_eq!(decide(&[], 0), None);
    }

    fn ballots() -> impl Strategy<Value = (usize, Vec<(usize, VoteValue, bool)>)> {
        (1usize..=5).prop_flat_map(|roster| {
            let value = prop_oneof![
                3 => Just(VoteValue::Approve),
                1 => Just(VoteValue::Reject),
                1 => Just(VoteValue::Abstain),
            ];
            (
                Just(roster),
                proptest::collection::vec((0..roster, value, any::<bool>()), 0..16),
            )
        })
    }

    proptest! {
        #[test]
        fn property_voting_never_regresses((roster, steps) in ballots()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let names: Vec<String> = (0..roster).map(|i| format!("M{}", i)).collect();
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                let fx = pending(&names).await;
                let mut closed: Option<ProposalStatus> = None;

                for (step, (voter, value, with_reason)) in steps.into_iter().enumerate() {
                    let comment = with_reason.then(|| format!("reason {}", step));
                    let result = fx.vote(voter, value, comment.as_deref()).await;

                    let stored = fx.repo.get_proposal(fx.proposal.id).await.unwrap().unwrap();
                    let votes = fx.repo.list_votes(fx.proposal.id).await.unwrap();
                    assert!(votes.len() <= roster);

                    match result {
                        Ok(outcome) => assert_eq!(outcome.status, stored.status),
                        Err(AppError::MissingReason) => {
                            assert!(value == VoteValue::Reject && comment.is_none());
                        }
                        Err(AppError::InvalidTransition(_)) => assert!(closed.is_some()),
                        Err(e) => panic!("unexpected error {:?}", e),
                    }

                    if let Some(terminal) = closed {
                        assert_eq!(stored.status, terminal);
                    }

                    match stored.status {
                        ProposalStatus::Pending => assert_eq!(decide(&votes, roster), None),
                        ProposalStatus::Approved => {
                            assert_eq!(votes.len(), roster);
                            assert!(votes.iter().all(|v| v.value == VoteValue::Approve));
                        }
                        ProposalStatus::Rejected => {
                            let rejects: Vec<&Vote> =
                                votes.iter().filter(|v| v.value == VoteValue::Reject).collect();
                            assert_eq!(rejects.len(), 1);
                            assert_eq!(stored.rejection_reason, rejects[0].comment);
                        }
                        other => panic!("unexpected status {}", other),
                    }

                    if stored.status.is_terminal() {
                        closed = Some(stored.status);
                    }
                }

                let content = fx.repo.list_content(2, Category::Theoretical).await.unwrap();
                let expected = usize::from(closed == Some(ProposalStatus::Approved));
                assert_eq!(content.len(), expected);
            });
        }
    }
}
