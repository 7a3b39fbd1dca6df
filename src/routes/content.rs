//! Published content routes

use crate::error::ApiResult;
use crate::governance::models::{Category, ContentRecord};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ContentQuery {
    #[validate(range(min = 1, max = 99, message = "Level must be between 1 and 99"))]
    pub level: u32,
    pub category: Category,
}

#[derive(Debug, Serialize)]
pub struct ContentListResponse {
    pub records: Vec<ContentRecord>,
}

/// Published records for one (level, category) bucket, in display order
pub async fn list_published(
    State(state): State<SharedState>,
    Query(query): Query<ContentQuery>,
) -> ApiResult<Json<SuccessResponse<ContentListResponse>>> {
    query.validate()?;

    let records = state
        .governance
        .list_published(query.level, query.category)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} records", records.len()),
        ContentListResponse { records },
    )))
}
