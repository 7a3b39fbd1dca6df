//! Proposal Routes
//!
//! Authoring, submission and voting endpoints.

use crate::auth::Claims;
use crate::error::AppError;
use crate::governance::models::{
    Actor, Category, ContentBlock, ContentRecord, NewProposal, Proposal, ProposalPatch,
    ProposalView, VoteValue,
};
use crate::governance::tally::VoteOutcome;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use crate::store::ProposalFilter;
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 5000))]
    pub description: String,
    pub category: Category,
    #[validate(length(min = 1, max = 10, message = "Between 1 and 10 target levels"))]
    pub target_levels: Vec<u32>,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    #[serde(default)]
    #[validate(range(max = 600))]
    pub estimated_minutes: u32,
}

impl From<CreateProposalRequest> for NewProposal {
    fn from(req: CreateProposalRequest) -> Self {
        NewProposal {
            title: req.title.trim().to_string(),
            description: req.description,
            category: req.category,
            target_levels: req.target_levels,
            blocks: req.blocks,
            estimated_minutes: req.estimated_minutes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProposalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub blocks: Option<Vec<ContentBlock>>,
    #[validate(range(max = 600))]
    pub estimated_minutes: Option<u32>,
}

impl From<UpdateProposalRequest> for ProposalPatch {
    fn from(req: UpdateProposalRequest) -> Self {
        ProposalPatch {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            blocks: req.blocks,
            estimated_minutes: req.estimated_minutes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub value: VoteValue,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalResponse {
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalListResponse {
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireResponse {
    pub expired: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub records: Vec<ContentRecord>,
}

// =============================================================================
// PROPOSAL ROUTES
// =============================================================================

/// Create a new draft proposal
pub async fn create_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<SuccessResponse<ProposalResponse>>), AppError> {
    req.validate()?;

    let proposal = state
        .governance
        .create_proposal(&Actor::from(&claims), req.into())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Proposal created",
            ProposalResponse { proposal },
        )),
    ))
}

/// List proposals
pub async fn list_proposals(
    State(state): State<SharedState>,
    Query(filter): Query<ProposalFilter>,
) -> Result<Json<SuccessResponse<ProposalListResponse>>, AppError> {
    let proposals = state.governance.list_proposals(&filter).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} proposals", proposals.len()),
        ProposalListResponse { proposals },
    )))
}

/// Get a proposal with its votes and tally
pub async fn get_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ProposalView>>, AppError> {
    let view = state.governance.get_proposal(id).await?;
    Ok(Json(SuccessResponse::with_data("Proposal retrieved", view)))
}

/// Edit a proposal's content fields
pub async fn update_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateProposalRequest>,
) -> Result<Json<SuccessResponse<ProposalResponse>>, AppError> {
    req.validate()?;

    let proposal = state
        .governance
        .update_proposal(&Actor::from(&claims), id, req.into())
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Proposal updated",
        ProposalResponse { proposal },
    )))
}

/// Delete a proposal nobody has voted on
pub async fn delete_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<()>>, AppError> {
    state
        .governance
        .delete_proposal(&Actor::from(&claims), id)
        .await?;

    Ok(Json(SuccessResponse::<()>::message_only(format!(
        "Proposal {} deleted",
        id
    ))))
}

/// Submit a draft for Maestro review
pub async fn submit_proposal(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ProposalResponse>>, AppError> {
    let proposal = state
        .governance
        .submit_proposal(&Actor::from(&claims), id)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!(
            "Proposal submitted to {} reviewers",
            proposal.roster_size()
        ),
        ProposalResponse { proposal },
    )))
}

/// Cast or overwrite the caller's vote
pub async fn cast_vote(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<CastVoteRequest>,
) -> Result<Json<SuccessResponse<VoteOutcome>>, AppError> {
    req.validate()?;

    let outcome = state
        .governance
        .cast_vote(&Actor::from(&claims), id, req.value, req.comment)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Vote recorded, proposal is {}", outcome.status),
        outcome,
    )))
}

/// Re-run publishing for an approved proposal
pub async fn republish(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<PublishResponse>>, AppError> {
    let records = state
        .governance
        .republish(&Actor::from(&claims), id)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Proposal published",
        PublishResponse { records },
    )))
}

/// Expire overdue pending proposals now
pub async fn expire_overdue(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SuccessResponse<ExpireResponse>>, AppError> {
    let expired = state
        .governance
        .expire_overdue(&Actor::from(&claims), Utc::now())
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Expired {} proposals", expired.len()),
        ExpireResponse { expired },
    )))
}
