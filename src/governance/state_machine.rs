//! Proposal state machine
//!
//! draft -> pending -> {approved, rejected, expired}. Terminal states have
//! no outgoing transitions. Every persisted transition is a conditional
//! write on the status it started from.

use crate::error::AppError;
use crate::governance::models::{ContentRecord, Proposal, ProposalStatus, Reviewer};
use crate::governance::publisher::ContentPublisher;
use crate::store::{Repository, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of a vote tally that ends voting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Approved,
    Rejected { reason: String },
}

/// Whether `from -> to` is a legal edge
pub fn can_transition(from: ProposalStatus, to: ProposalStatus) -> bool {
    use ProposalStatus::*;
    matches!(
        (from, to),
        (Draft, Pending) | (Pending, Approved) | (Pending, Rejected) | (Pending, Expired)
    )
}

fn refuse_terminal(proposal: &Proposal) -> Result<(), AppError> {
    if proposal.status.is_terminal() {
        return Err(AppError::AlreadyResolved(format!(
            "Proposal {} is already {}",
            proposal.id, proposal.status
        )));
    }
    Ok(())
}

/// draft -> pending, capturing the roster snapshot
pub fn submit(
    proposal: &mut Proposal,
    roster: Vec<Reviewer>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    refuse_terminal(proposal)?;
    if proposal.status != ProposalStatus::Draft {
        return Err(AppError::InvalidState(format!(
            "Proposal {} is {}, only drafts can be submitted",
            proposal.id, proposal.status
        )));
    }
    if roster.is_empty() {
        return Err(AppError::Config(
            "No eligible Maestros in the roster, proposal cannot enter voting".to_string(),
        ));
    }

    proposal.status = ProposalStatus::Pending;
    proposal.roster_snapshot = roster;
    proposal.submitted_at = Some(now);
    proposal.updated_at = now;
    Ok(())
}

/// pending -> approved | rejected
pub fn resolve(
    proposal: &mut Proposal,
    resolution: &Resolution,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    refuse_terminal(proposal)?;
    if proposal.status != ProposalStatus::Pending {
        return Err(AppError::InvalidTransition(format!(
            "Proposal {} is {}, only pending proposals can be resolved",
            proposal.id, proposal.status
        )));
    }

    match resolution {
        Resolution::Approved => {
            proposal.status = ProposalStatus::Approved;
        }
        Resolution::Rejected { reason } => {
            proposal.status = ProposalStatus::Rejected;
            proposal.rejection_reason = Some(reason.clone());
        }
    }
    proposal.resolved_at = Some(now);
    proposal.updated_at = now;
    Ok(())
}

/// pending -> expired once `now - submitted_at` exceeds the deadline.
/// Returns whether the proposal expired.
pub fn expire(
    proposal: &mut Proposal,
    now: DateTime<Utc>,
    deadline: Duration,
) -> Result<bool, AppError> {
    refuse_terminal(proposal)?;
    if proposal.status != ProposalStatus::Pending {
        return Err(AppError::InvalidState(format!(
            "Proposal {} is {}, only pending proposals can expire",
            proposal.id, proposal.status
        )));
    }

    let overdue = proposal
        .submitted_at
        .map_or(false, |submitted| now - submitted > deadline);
    if !overdue {
        return Ok(false);
    }

    proposal.status = ProposalStatus::Expired;
    proposal.resolved_at = Some(now);
    proposal.updated_at = now;
    Ok(true)
}

/// A committed resolution, plus whatever it published
#[derive(Debug, Clone)]
pub struct Resolved {
    pub proposal: Proposal,
    pub published: Vec<ContentRecord>,
}

/// Persisting front-end of the transition rules
#[derive(Clone)]
pub struct ProposalStateMachine {
    repo: Arc<dyn Repository>,
    publisher: ContentPublisher,
    deadline: Duration,
}

impl ProposalStateMachine {
    pub fn new(repo: Arc<dyn Repository>, publisher: ContentPublisher, deadline: Duration) -> Self {
        Self {
            repo,
            publisher,
            deadline,
        }
    }

    pub async fn load(&self, id: Uuid) -> Result<Proposal, AppError> {
        self.repo
            .get_proposal(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))
    }

    /// Submit a draft for voting with the given roster snapshot
    pub async fn submit(&self, id: Uuid, roster: Vec<Reviewer>) -> Result<Proposal, AppError> {
        let mut proposal = self.load(id).await?;
        let from = proposal.status;
        submit(&mut proposal, roster, Utc::now())?;
        self.commit(&proposal, from).await?;

        info!(
            proposal_id = %proposal.id,
            roster_size = proposal.roster_size(),
            "Proposal submitted for voting"
        );
        Ok(proposal)
    }

    /// Expire a pending proposal if its deadline has passed
    pub async fn expire_if_overdue(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ProposalStatus, AppError> {
        let mut proposal = self.load(id).await?;
        let from = proposal.status;
        if expire(&mut proposal, now, self.deadline)? {
            self.commit(&proposal, from).await?;
            info!(proposal_id = %proposal.id, "Proposal expired without resolution");
        }
        Ok(proposal.status)
    }

    /// Lazy expiry applied on read. Non-pending proposals pass through.
    pub async fn refresh(&self, proposal: Proposal, now: DateTime<Utc>) -> Result<Proposal, AppError> {
        if proposal.status != ProposalStatus::Pending {
            return Ok(proposal);
        }

        let mut candidate = proposal.clone();
        if !expire(&mut candidate, now, self.deadline)? {
            return Ok(proposal);
        }

        match self.commit(&candidate, ProposalStatus::Pending).await {
            Ok(()) => {
                info!(proposal_id = %candidate.id, "Proposal expired without resolution");
                Ok(candidate)
            }
            // Resolved by a vote in the meantime
            Err(AppError::AlreadyResolved(_)) => self.load(proposal.id).await,
            Err(e) => Err(e),
        }
    }

    /// Commit a vote-driven resolution, publishing on approval
    pub async fn resolve(
        &self,
        mut proposal: Proposal,
        resolution: &Resolution,
    ) -> Result<Resolved, AppError> {
        let from = proposal.status;
        resolve(&mut proposal, resolution, Utc::now())?;
        self.commit(&proposal, from).await?;

        info!(
            proposal_id = %proposal.id,
            status = %proposal.status,
            "Proposal resolved"
        );

        let published = if proposal.status == ProposalStatus::Approved {
            self.publisher.publish(&proposal).await?
        } else {
            Vec::new()
        };

        Ok(Resolved {
            proposal,
            published,
        })
    }

    async fn commit(&self, proposal: &Proposal, from: ProposalStatus) -> Result<(), AppError> {
        if !can_transition(from, proposal.status) {
            return Err(AppError::InvalidTransition(format!(
                "Proposal {} cannot move from {} to {}",
                proposal.id, from, proposal.status
            )));
        }
        debug!(
            proposal_id = %proposal.id,
            from = %from,
            to = %proposal.status,
            "Committing transition"
        );
        match self.repo.update_proposal(proposal, from).await {
            Ok(()) => Ok(()),
            Err(StoreError::StaleState { found, .. }) => {
                let found_terminal = found
                    .parse::<ProposalStatus>()
                    .map(|s| s.is_terminal())
                    .unwrap_or(false);
                if found_terminal {
                    Err(AppError::AlreadyResolved(format!(
                        "Proposal {} was resolved concurrently ({})",
                        proposal.id, found
                    )))
                } else {
                    Err(AppError::InvalidState(format!(
                        "Proposal {} changed concurrently (now {})",
                        proposal.id, found
                    )))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
