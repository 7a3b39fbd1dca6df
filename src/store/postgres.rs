// PostgreSQL repository
//
// Uniqueness is enforced by the schema in `db::create_tables`; violations
// come back as `StoreError::Conflict` carrying the constraint name.

use super::{
    resolution_matches_votes, ProposalFilter, Repository, StoreError, RESOLUTION_VOTES_CHECK,
};
use crate::governance::models::{
    Category, ContentBlock, ContentRecord, ContentSource, MigrationResult, Proposal,
    ProposalStatus, Reviewer, Vote, VoteValue,
};
use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use std::str::FromStr;
use tokio_postgres::{error::SqlState, types::Json, Row};
use uuid::Uuid;

const PROPOSAL_COLUMNS: &str = "id, title, description, category, target_levels, blocks, \
     estimated_minutes, author_id, author_name, author_level, status, roster_snapshot, \
     rejection_reason, created_at, updated_at, submitted_at, resolved_at";

const VOTE_COLUMNS: &str = "id, proposal_id, voter_id, voter_name, value, comment, cast_at";

const CONTENT_COLUMNS: &str = "id, proposal_id, external_key, title, description, level, \
     category, display_order, locked, estimated_minutes, source, published_at";

fn pool_error(e: PoolError) -> StoreError {
    StoreError::Unavailable(format!("Database pool error: {}", e))
}

fn db_error(e: tokio_postgres::Error) -> StoreError {
    if let Some(db) = e.as_db_error() {
        if *db.code() == SqlState::UNIQUE_VIOLATION {
            return StoreError::Conflict(db.constraint().unwrap_or("unknown").to_string());
        }
    }
    if e.is_closed() {
        return StoreError::Unavailable(format!("Database connection closed: {}", e));
    }
    StoreError::Query(format!("Database error: {}", e))
}

fn parse_col<T: FromStr<Err = String>>(row: &Row, col: &str) -> Result<T, StoreError> {
    let raw: String = row.try_get(col).map_err(db_error)?;
    raw.parse()
        .map_err(|e: String| StoreError::Query(format!("Column {}: {}", col, e)))
}

fn u32_col(row: &Row, col: &str) -> Result<u32, StoreError> {
    let value: i32 = row.try_get(col).map_err(db_error)?;
    u32::try_from(value).map_err(|_| StoreError::Query(format!("Column {} is negative", col)))
}

fn row_to_proposal(row: &Row) -> Result<Proposal, StoreError> {
    let Json(target_levels): Json<Vec<u32>> = row.try_get("target_levels").map_err(db_error)?;
    let Json(blocks): Json<Vec<ContentBlock>> = row.try_get("blocks").map_err(db_error)?;
    let Json(roster_snapshot): Json<Vec<Reviewer>> =
        row.try_get("roster_snapshot").map_err(db_error)?;

    Ok(Proposal {
        id: row.try_get("id").map_err(db_error)?,
        title: row.try_get("title").map_err(db_error)?,
        description: row.try_get("description").map_err(db_error)?,
        category: parse_col(row, "category")?,
        target_levels,
        blocks,
        estimated_minutes: u32_col(row, "estimated_minutes")?,
        author_id: row.try_get("author_id").map_err(db_error)?,
        author_name: row.try_get("author_name").map_err(db_error)?,
        author_level: u32_col(row, "author_level")?,
        status: parse_col(row, "status")?,
        roster_snapshot,
        rejection_reason: row.try_get("rejection_reason").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
        submitted_at: row.try_get("submitted_at").map_err(db_error)?,
        resolved_at: row.try_get("resolved_at").map_err(db_error)?,
    })
}

fn row_to_vote(row: &Row) -> Result<Vote, StoreError> {
    Ok(Vote {
        id: row.try_get("id").map_err(db_error)?,
        proposal_id: row.try_get("proposal_id").map_err(db_error)?,
        voter_id: row.try_get("voter_id").map_err(db_error)?,
        voter_name: row.try_get("voter_name").map_err(db_error)?,
        value: parse_col::<VoteValue>(row, "value")?,
        comment: row.try_get("comment").map_err(db_error)?,
        cast_at: row.try_get("cast_at").map_err(db_error)?,
    })
}

fn row_to_content(row: &Row) -> Result<ContentRecord, StoreError> {
    Ok(ContentRecord {
        id: row.try_get("id").map_err(db_error)?,
        proposal_id: row.try_get("proposal_id").map_err(db_error)?,
        external_key: row.try_get("external_key").map_err(db_error)?,
        title: row.try_get("title").map_err(db_error)?,
        description: row.try_get("description").map_err(db_error)?,
        level: u32_col(row, "level")?,
        category: parse_col(row, "category")?,
        display_order: u32_col(row, "display_order")?,
        locked: row.try_get("locked").map_err(db_error)?,
        estimated_minutes: u32_col(row, "estimated_minutes")?,
        source: parse_col::<ContentSource>(row, "source")?,
        published_at: row.try_get("published_at").map_err(db_error)?,
    })
}

/// Repository backed by a deadpool-postgres pool
#[derive(Clone)]
pub struct PostgresRepository {
    pool: Pool,
}

impl PostgresRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_proposal(&self, proposal: &Proposal) -> Result<(), StoreError> {
        let client = self.client().await?;
        let query = format!(
            "INSERT INTO proposals ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            PROPOSAL_COLUMNS
        );

        client
            .execute(
                query.as_str(),
                &[
                    &proposal.id,
                    &proposal.title,
                    &proposal.description,
                    &proposal.category.as_str(),
                    &Json(&proposal.target_levels),
                    &Json(&proposal.blocks),
                    &(proposal.estimated_minutes as i32),
                    &proposal.author_id,
                    &proposal.author_name,
                    &(proposal.author_level as i32),
                    &proposal.status.as_str(),
                    &Json(&proposal.roster_snapshot),
                    &proposal.rejection_reason,
                    &proposal.created_at,
                    &proposal.updated_at,
                    &proposal.submitted_at,
                    &proposal.resolved_at,
                ],
            )
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, StoreError> {
        let client = self.client().await?;
        let query = format!("SELECT {} FROM proposals WHERE id = $1", PROPOSAL_COLUMNS);

        let row = client
            .query_opt(query.as_str(), &[&id])
            .await
            .map_err(db_error)?;

        row.as_ref().map(row_to_proposal).transpose()
    }

    async fn list_proposals(&self, filter: &ProposalFilter) -> Result<Vec<Proposal>, StoreError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {} FROM proposals \
             WHERE ($1::text IS NULL OR status = $1) \
               AND ($2::uuid IS NULL OR author_id = $2) \
               AND ($3::int IS NULL OR target_levels @> jsonb_build_array($3::int)) \
               AND ($4::text IS NULL OR category = $4) \
             ORDER BY created_at DESC",
            PROPOSAL_COLUMNS
        );

        let status = filter.status.map(|s| s.as_str());
        let level = filter.level.map(|l| l as i32);
        let category = filter.category.map(|c| c.as_str());

        let rows = client
            .query(
                query.as_str(),
                &[&status, &filter.author_id, &level, &category],
            )
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_proposal).collect()
    }

    async fn update_proposal(
        &self,
        proposal: &Proposal,
        expected: ProposalStatus,
    ) -> Result<(), StoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        // Waits for in-flight vote upserts, which hold the row FOR SHARE
        let status_row = tx
            .query_opt(
                "SELECT status FROM proposals WHERE id = $1 FOR UPDATE",
                &[&proposal.id],
            )
            .await
            .map_err(db_error)?
            .ok_or_else(|| StoreError::NotFound(format!("Proposal {}", proposal.id)))?;

        let found: ProposalStatus = parse_col(&status_row, "status")?;
        if found != expected {
            return Err(StoreError::StaleState {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }

        if proposal.status != expected {
            let counts = tx
                .query_one(
                    "SELECT
                        COUNT(*) FILTER (WHERE value = 'approve') AS approve,
                        COUNT(*) FILTER (WHERE value = 'reject') AS reject
                     FROM proposal_votes WHERE proposal_id = $1",
                    &[&proposal.id],
                )
                .await
                .map_err(db_error)?;
            let approve: i64 = counts.try_get("approve").map_err(db_error)?;
            let reject: i64 = counts.try_get("reject").map_err(db_error)?;
            if !resolution_matches_votes(proposal, approve as usize, reject as usize) {
                return Err(StoreError::Conflict(RESOLUTION_VOTES_CHECK.to_string()));
            }
        }

        tx.execute(
            "UPDATE proposals SET
                title = $2, description = $3, blocks = $4, estimated_minutes = $5,
                status = $6, roster_snapshot = $7, rejection_reason = $8,
                updated_at = $9, submitted_at = $10, resolved_at = $11
             WHERE id = $1",
            &[
                &proposal.id,
                &proposal.title,
                &proposal.description,
                &Json(&proposal.blocks),
                &(proposal.estimated_minutes as i32),
                &proposal.status.as_str(),
                &Json(&proposal.roster_snapshot),
                &proposal.rejection_reason,
                &proposal.updated_at,
                &proposal.submitted_at,
                &proposal.resolved_at,
            ],
        )
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_proposal(&self, id: Uuid) -> Result<(), StoreError> {
        let client = self.client().await?;

        let deleted = client
            .execute("DELETE FROM proposals WHERE id = $1", &[&id])
            .await
            .map_err(db_error)?;

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("Proposal {}", id)));
        }
        Ok(())
    }

    async fn upsert_vote(&self, vote: &Vote) -> Result<Vote, StoreError> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(db_error)?;

        // Hold the status steady until the vote is written
        let status_row = tx
            .query_opt(
                "SELECT status FROM proposals WHERE id = $1 FOR SHARE",
                &[&vote.proposal_id],
            )
            .await
            .map_err(db_error)?
            .ok_or_else(|| StoreError::NotFound(format!("Proposal {}", vote.proposal_id)))?;

        let status: ProposalStatus = parse_col(&status_row, "status")?;
        if status != ProposalStatus::Pending {
            return Err(StoreError::StaleState {
                expected: ProposalStatus::Pending.to_string(),
                found: status.to_string(),
            });
        }

        let query = format!(
            "INSERT INTO proposal_votes ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT ON CONSTRAINT {key} DO UPDATE SET \
                voter_name = EXCLUDED.voter_name, value = EXCLUDED.value, \
                comment = EXCLUDED.comment, cast_at = EXCLUDED.cast_at \
             RETURNING {cols}",
            cols = VOTE_COLUMNS,
            key = super::VOTE_UNIQUE
        );

        let row = tx
            .query_one(
                query.as_str(),
                &[
                    &vote.id,
                    &vote.proposal_id,
                    &vote.voter_id,
                    &vote.voter_name,
                    &vote.value.as_str(),
                    &vote.comment,
                    &vote.cast_at,
                ],
            )
            .await
            .map_err(db_error)?;
        let stored = row_to_vote(&row)?;

        tx.commit().await.map_err(db_error)?;
        Ok(stored)
    }

    async fn list_votes(&self, proposal_id: Uuid) -> Result<Vec<Vote>, StoreError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {} FROM proposal_votes WHERE proposal_id = $1 ORDER BY cast_at",
            VOTE_COLUMNS
        );

        let rows = client
            .query(query.as_str(), &[&proposal_id])
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_vote).collect()
    }

    async fn create_content_record(&self, record: &ContentRecord) -> Result<(), StoreError> {
        let client = self.client().await?;
        let query = format!(
            "INSERT INTO content_records ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            CONTENT_COLUMNS
        );

        client
            .execute(
                query.as_str(),
                &[
                    &record.id,
                    &record.proposal_id,
                    &record.external_key,
                    &record.title,
                    &record.description,
                    &(record.level as i32),
                    &record.category.as_str(),
                    &(record.display_order as i32),
                    &record.locked,
                    &(record.estimated_minutes as i32),
                    &record.source.as_str(),
                    &record.published_at,
                ],
            )
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn get_max_display_order(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Option<u32>, StoreError> {
        let client = self.client().await?;

        let row = client
            .query_one(
                "SELECT MAX(display_order) AS max_order FROM content_records
                 WHERE level = $1 AND category = $2",
                &[&(level as i32), &category.as_str()],
            )
            .await
            .map_err(db_error)?;

        let max: Option<i32> = row.try_get("max_order").map_err(db_error)?;
        Ok(max.map(|m| m.max(0) as u32))
    }

    async fn find_content_by_external_key(
        &self,
        key: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {} FROM content_records WHERE external_key = $1",
            CONTENT_COLUMNS
        );

        let row = client
            .query_opt(query.as_str(), &[&key])
            .await
            .map_err(db_error)?;

        row.as_ref().map(row_to_content).transpose()
    }

    async fn find_content_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {} FROM content_records WHERE proposal_id = $1 ORDER BY level",
            CONTENT_COLUMNS
        );

        let rows = client
            .query(query.as_str(), &[&proposal_id])
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_content).collect()
    }

    async fn list_content(
        &self,
        level: u32,
        category: Category,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let client = self.client().await?;
        let query = format!(
            "SELECT {} FROM content_records \
             WHERE level = $1 AND category = $2 ORDER BY display_order",
            CONTENT_COLUMNS
        );

        let rows = client
            .query(query.as_str(), &[&(level as i32), &category.as_str()])
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_content).collect()
    }

    async fn save_migration_result(&self, result: &MigrationResult) -> Result<(), StoreError> {
        let client = self.client().await?;

        client
            .execute(
                "INSERT INTO migration_runs (run_id, started_at, finished_at, success, result)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (run_id) DO UPDATE SET
                    finished_at = EXCLUDED.finished_at,
                    success = EXCLUDED.success,
                    result = EXCLUDED.result",
                &[
                    &result.run_id,
                    &result.started_at,
                    &result.finished_at,
                    &result.success,
                    &Json(result),
                ],
            )
            .await
            .map_err(db_error)?;

        Ok(())
    }

    async fn latest_migration_result(&self) -> Result<Option<MigrationResult>, StoreError> {
        let client = self.client().await?;

        let row = client
            .query_opt(
                "SELECT result FROM migration_runs ORDER BY started_at DESC LIMIT 1",
                &[],
            )
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => {
                let Json(result): Json<MigrationResult> =
                    row.try_get("result").map_err(db_error)?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }
}
