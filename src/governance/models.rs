//! Governance data models
//!
//! Proposals, votes, published content records and the migration report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Proposal status in the governance workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Being edited by its author
    #[default]
    Draft,
    /// Submitted, Maestros are voting
    Pending,
    /// Every Maestro in the roster snapshot approved
    Approved,
    /// At least one Maestro rejected
    Rejected,
    /// Voting deadline passed without a resolution
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Approved | ProposalStatus::Rejected | ProposalStatus::Expired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProposalStatus::Draft),
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "expired" => Ok(ProposalStatus::Expired),
            other => Err(format!("unknown proposal status '{}'", other)),
        }
    }
}

/// Curriculum category of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Theoretical,
    Practical,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Theoretical => "theoretical",
            Category::Practical => "practical",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "theoretical" => Ok(Category::Theoretical),
            "practical" => Ok(Category::Practical),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

/// A block of lesson content. Stored opaquely by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentBlock {
    Heading {
        text: String,
        level: u8,
    },
    Paragraph {
        text: String,
    },
    Image {
        url: String,
        alt: Option<String>,
    },
    Video {
        url: String,
        caption: Option<String>,
    },
    Code {
        language: String,
        source: String,
    },
    Quote {
        text: String,
        attribution: Option<String>,
    },
    List {
        ordered: bool,
        items: Vec<String>,
    },
    /// Knowledge check closing a module
    Checkpoint {
        question: String,
        options: Vec<String>,
        answer_index: usize,
    },
}

impl ContentBlock {
    pub fn is_checkpoint(&self) -> bool {
        matches!(self, ContentBlock::Checkpoint { .. })
    }
}

/// Caller identity handed to the engine by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub name: String,
    pub level: u32,
}

/// An eligible voter as supplied by the roster provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reviewer {
    pub id: Uuid,
    pub name: String,
    pub level: u32,
}

/// Author-supplied fields of a new proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProposal {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    pub target_levels: Vec<u32>,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    #[serde(default)]
    pub estimated_minutes: u32,
}

/// Partial update of a proposal's content fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub blocks: Option<Vec<ContentBlock>>,
    pub estimated_minutes: Option<u32>,
}

impl ProposalPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.blocks.is_none()
            && self.estimated_minutes.is_none()
    }
}

/// A candidate piece of curriculum content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    /// Sorted, deduplicated
    pub target_levels: Vec<u32>,
    pub blocks: Vec<ContentBlock>,
    pub estimated_minutes: u32,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_level: u32,
    pub status: ProposalStatus,
    /// Voters captured at submission; empty while draft
    pub roster_snapshot: Vec<Reviewer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Create a new draft proposal
    pub fn new(draft: NewProposal, author: &Actor) -> Self {
        let now = Utc::now();
        let mut target_levels = draft.target_levels;
        target_levels.sort_unstable();
        target_levels.dedup();

        Self {
            id: Uuid::new_v4(),
            title: draft.title,
            description: draft.description,
            category: draft.category,
            target_levels,
            blocks: draft.blocks,
            estimated_minutes: draft.estimated_minutes,
            author_id: author.id,
            author_name: author.name.clone(),
            author_level: author.level,
            status: ProposalStatus::Draft,
            roster_snapshot: Vec::new(),
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            resolved_at: None,
        }
    }

    /// Build an already-approved proposal for a bulk import.
    /// Bypasses voting entirely.
    pub fn imported(draft: NewProposal, author: &Actor) -> Self {
        let mut proposal = Self::new(draft, author);
        proposal.status = ProposalStatus::Approved;
        proposal.submitted_at = Some(proposal.created_at);
        proposal.resolved_at = Some(proposal.created_at);
        proposal
    }

    pub fn apply_patch(&mut self, patch: ProposalPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(blocks) = patch.blocks {
            self.blocks = blocks;
        }
        if let Some(minutes) = patch.estimated_minutes {
            self.estimated_minutes = minutes;
        }
        self.updated_at = Utc::now();
    }

    pub fn in_roster(&self, voter_id: Uuid) -> bool {
        self.roster_snapshot.iter().any(|r| r.id == voter_id)
    }

    pub fn roster_size(&self) -> usize {
        self.roster_snapshot.len()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_checkpoint()).count()
    }
}

/// Vote value cast by a Maestro
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteValue {
    Approve,
    Reject,
    Abstain,
}

impl VoteValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteValue::Approve => "approve",
            VoteValue::Reject => "reject",
            VoteValue::Abstain => "abstain",
        }
    }
}

impl FromStr for VoteValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(VoteValue::Approve),
            "reject" => Ok(VoteValue::Reject),
            "abstain" => Ok(VoteValue::Abstain),
            other => Err(format!("unknown vote value '{}'", other)),
        }
    }
}

/// One reviewer's decision on one proposal.
/// Unique per (proposal_id, voter_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub voter_id: Uuid,
    pub voter_name: String,
    pub value: VoteValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub cast_at: DateTime<Utc>,
}

/// Vote counts measured against the roster snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub approve: usize,
    pub reject: usize,
    pub abstain: usize,
    pub roster_size: usize,
}

impl Tally {
    pub fn from_votes(votes: &[Vote], roster_size: usize) -> Self {
        let count = |value: VoteValue| votes.iter().filter(|v| v.value == value).count();
        Self {
            approve: count(VoteValue::Approve),
            reject: count(VoteValue::Reject),
            abstain: count(VoteValue::Abstain),
            roster_size,
        }
    }
}

/// Proposal read model for the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalView {
    pub proposal: Proposal,
    pub votes: Vec<Vote>,
    pub tally: Tally,
}

/// Where a content record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Proposal,
    Migration,
}

impl ContentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentSource::Proposal => "proposal",
            ContentSource::Migration => "migration",
        }
    }
}

impl FromStr for ContentSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposal" => Ok(ContentSource::Proposal),
            "migration" => Ok(ContentSource::Migration),
            other => Err(format!("unknown content source '{}'", other)),
        }
    }
}

/// Published, orderable, lockable curriculum item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: Uuid,
    pub proposal_id: Option<Uuid>,
    /// Legacy slug for migrated content
    pub external_key: Option<String>,
    pub title: String,
    pub description: String,
    pub level: u32,
    pub category: Category,
    /// Unique within (level, category), starting at 1
    pub display_order: u32,
    pub locked: bool,
    pub estimated_minutes: u32,
    pub source: ContentSource,
    pub published_at: DateTime<Utc>,
}

/// Checkpoint attached to a legacy module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyCheckpoint {
    pub title: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub answer_index: usize,
}

/// A module descriptor from the legacy static catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyModule {
    /// Stable legacy path/slug
    pub external_key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub level: u32,
    pub category: Category,
    #[serde(default)]
    pub estimated_minutes: u32,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    #[serde(default)]
    pub checkpoints: Vec<LegacyCheckpoint>,
}

impl LegacyModule {
    /// Proposal fields for the synthesized import proposal
    pub fn to_new_proposal(&self) -> NewProposal {
        let mut blocks = self.blocks.clone();
        blocks.extend(self.checkpoints.iter().map(|c| ContentBlock::Checkpoint {
            question: c.question.clone(),
            options: c.options.clone(),
            answer_index: c.answer_index,
        }));

        NewProposal {
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category,
            target_levels: vec![self.level],
            blocks,
            estimated_minutes: self.estimated_minutes,
        }
    }
}

/// A module created by a migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratedModule {
    pub external_key: String,
    pub title: String,
    pub level: u32,
    pub proposal_id: Uuid,
    pub content_id: Uuid,
    pub display_order: u32,
    pub estimated_minutes: u32,
}

/// A checkpoint created by a migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratedCheckpoint {
    pub module_key: String,
    pub title: String,
}

/// Per-item note in a migration report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationIssue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_key: Option<String>,
    pub message: String,
}

impl MigrationIssue {
    pub fn new(external_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            external_key: Some(external_key.into()),
            message: message.into(),
        }
    }
}

/// Structured report of one migration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub run_id: Uuid,
    pub theoretical_modules: Vec<MigratedModule>,
    pub practical_modules: Vec<MigratedModule>,
    pub checkpoints: Vec<MigratedCheckpoint>,
    pub total_estimated_minutes: u64,
    /// True iff no hard errors were recorded
    pub success: bool,
    /// The run stopped early on request
    pub cancelled: bool,
    pub errors: Vec<MigrationIssue>,
    pub warnings: Vec<MigrationIssue>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationResult {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            theoretical_modules: Vec::new(),
            practical_modules: Vec::new(),
            checkpoints: Vec::new(),
            total_estimated_minutes: 0,
            success: false,
            cancelled: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn created_count(&self) -> usize {
        self.theoretical_modules.len() + self.practical_modules.len()
    }

    pub fn finish(&mut self) {
        self.success = self.errors.is_empty();
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn author() -> Actor {
        Actor {
            id: Uuid::new_v4(),
            name: "Ana".to_string(),
            level: 4,
        }
    }

    #[test]
    fn test_new_proposal_normalizes_levels() {
        let proposal = Proposal::new(
            NewProposal {
                title: "Scales".to_string(),
                description: String::new(),
                category: Category::Theoretical,
                target_levels: vec![3, 1, 3, 2],
                blocks: vec![],
                estimated_minutes: 20,
            },
            &author(),
        );

        assert_eq!(proposal.target_levels, vec![1, 2, 3]);
        assert_eq!(proposal.status, ProposalStatus::Draft);
        assert!(proposal.roster_snapshot.is_empty());
        assert!(proposal.submitted_at.is_none());
    }

    #[test]
    fn test_only_resolved_states_are_terminal() {
        assert!(!ProposalStatus::Draft.is_terminal());
        assert!(!ProposalStatus::Pending.is_terminal());
        for terminal in [
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
            ProposalStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_legacy_checkpoints_become_blocks() {
        let module = LegacyModule {
            external_key: "nivel-1/teoria/intervalos".to_string(),
            title: "Intervals".to_string(),
            description: String::new(),
            level: 1,
            category: Category::Theoretical,
            estimated_minutes: 15,
            blocks: vec![ContentBlock::Paragraph {
                text: "An interval is...".to_string(),
            }],
            checkpoints: vec![LegacyCheckpoint {
                title: "Quiz".to_string(),
                question: "What is a fifth?".to_string(),
                options: vec!["7 semitones".to_string(), "5 semitones".to_string()],
                answer_index: 0,
            }],
        };

        let draft = module.to_new_proposal();
        assert_eq!(draft.target_levels, vec![1]);
        assert_eq!(draft.blocks.len(), 2);
        assert!(draft.blocks[1].is_checkpoint());
    }

    #[test]
    fn test_block_serializes_with_type_tag() {
        let block = ContentBlock::Code {
            language: "rust".to_string(),
            source: "fn main() {}".to_string(),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "code");
        assert_eq!(json["language"], "rust");
    }

    #[test]
    fn test_tally_counts_each_value() {
        let proposal_id = Uuid::new_v4();
        let vote = |value| Vote {
            id: Uuid::new_v4(),
            proposal_id,
            voter_id: Uuid::new_v4(),
            voter_name: "M".to_string(),
            value,
            comment: None,
            cast_at: Utc::now(),
        };
        let votes = vec![
            vote(VoteValue::Approve),
            vote(VoteValue::Abstain),
            vote(VoteValue::Approve),
        ];

        let tally = Tally::from_votes(&votes, 4);
        assert_eq!(
            tally,
            Tally {
                approve: 2,
                reject: 0,
                abstain: 1,
                roster_size: 4
            }
        );
    }
}
