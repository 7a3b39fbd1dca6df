//! Permission oracle
//!
//! Side-effect-free predicates deciding who may propose, vote, edit or
//! delete. A `false` answer is not an error; callers decide whether it
//! becomes `AppError::Forbidden`.

use crate::config::GovernanceConfig;
use crate::governance::models::ProposalStatus;
use uuid::Uuid;

/// Level-based authorization rules, parameterized at construction
#[derive(Debug, Clone)]
pub struct PermissionOracle {
    /// The single level allowed to vote
    maestro_level: u32,
    /// Levels allowed to author proposals
    authoring_levels: Vec<u32>,
    /// Founder-equivalent levels
    override_levels: Vec<u32>,
    /// Individual users granted override authority
    override_user_ids: Vec<Uuid>,
}

impl PermissionOracle {
    pub fn new(
        maestro_level: u32,
        authoring_levels: Vec<u32>,
        override_levels: Vec<u32>,
        override_user_ids: Vec<Uuid>,
    ) -> Self {
        Self {
            maestro_level,
            authoring_levels,
            override_levels,
            override_user_ids,
        }
    }

    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self::new(
            config.maestro_level,
            config.authoring_levels.clone(),
            config.override_levels.clone(),
            config.override_user_ids.clone(),
        )
    }

    pub fn can_propose(&self, level: u32) -> bool {
        self.authoring_levels.contains(&level)
    }

    pub fn can_vote(&self, level: u32) -> bool {
        level == self.maestro_level
    }

    pub fn has_override(&self, level: u32, requester_id: Uuid) -> bool {
        self.override_levels.contains(&level) || self.override_user_ids.contains(&requester_id)
    }

    pub fn can_edit_proposal(
        &self,
        level: u32,
        author_id: Uuid,
        requester_id: Uuid,
        status: ProposalStatus,
    ) -> bool {
        let open = matches!(status, ProposalStatus::Draft | ProposalStatus::Pending);
        (author_id == requester_id && open) || self.has_override(level, requester_id)
    }

    /// Same rule as editing, but never once a vote exists
    pub fn can_delete_proposal(
        &self,
        level: u32,
        author_id: Uuid,
        requester_id: Uuid,
        status: ProposalStatus,
        votes_cast: usize,
    ) -> bool {
        votes_cast == 0 && self.can_edit_proposal(level, author_id, requester_id, status)
    }
}
