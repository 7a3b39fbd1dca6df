//! Legacy catalog migration routes

use crate::auth::Claims;
use crate::error::ApiResult;
use crate::governance::models::{Actor, LegacyModule, MigrationResult};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct MigrationRequest {
    #[validate(length(min = 1, message = "At least one legacy module is required"))]
    pub modules: Vec<LegacyModule>,
}

/// Import a legacy catalog; stops early if the server begins shutting down
pub async fn run_migration(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MigrationRequest>,
) -> ApiResult<Json<SuccessResponse<MigrationResult>>> {
    req.validate()?;

    let result = state
        .governance
        .migrate_all(
            &Actor::from(&claims),
            &req.modules,
            Some(state.shutdown.clone()),
        )
        .await?;

    let message = if result.cancelled {
        "Migration cancelled"
    } else if result.success {
        "Migration completed"
    } else {
        "Migration completed with errors"
    };

    Ok(Json(SuccessResponse::with_data(message, result)))
}

/// Result of the most recent migration run
pub async fn latest_migration(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<MigrationResult>>> {
    let result = state.governance.last_migration().await?;
    Ok(Json(SuccessResponse::with_data("Latest migration", result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_needs_modules() {
        let empty: MigrationRequest = serde_json::from_value(json!({ "modules": [] })).unwrap();
        assert!(empty.validate().is_err());

        let one: MigrationRequest = serde_json::from_value(json!({
            "modules": [{
                "externalKey": "nivel-1/teoria/modulo-1",
                "title": "Pulse",
                "level": 1,
                "category": "theoretical"
            }]
        }))
        .unwrap();
        assert!(one.validate().is_ok());
        assert_eq!(one.modules[0].estimated_minutes, 0);
    }
}
