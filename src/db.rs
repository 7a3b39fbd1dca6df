//! Database connection management
//!
//! Builds the connection pool (TLS when the URL asks for it) and creates
//! the governance schema if it is missing.

use crate::config::DatabaseConfig;
use crate::store::{CONTENT_EXTERNAL_KEY_UNIQUE, CONTENT_ORDER_UNIQUE, VOTE_UNIQUE};
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tracing::{debug, info};

/// Create a pool and verify it with a round trip
pub async fn init_pool(db: &DatabaseConfig) -> anyhow::Result<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(db.host.clone());
    cfg.port = Some(db.port);
    cfg.user = Some(db.user.clone());
    cfg.password = Some(db.password.clone());
    cfg.dbname = Some(db.database.clone());
    cfg.pool = Some(PoolConfig::new(db.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if db.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| anyhow::anyhow!("Failed to create TLS pool: {}", e))?
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| anyhow::anyhow!("Failed to create pool: {}", e))?
    };

    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to get pool connection: {}", e))?;
    client
        .query_one("SELECT 1 as ok", &[])
        .await
        .map_err(|e| anyhow::anyhow!("Failed to verify database connection: {}", e))?;

    info!(
        host = %db.host,
        database = %db.database,
        tls = db.require_tls,
        "Database connection successful"
    );
    Ok(pool)
}

/// Create governance tables if they don't exist
pub async fn create_tables(pool: &Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS proposals (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category VARCHAR(20) NOT NULL,
                target_levels JSONB NOT NULL,
                blocks JSONB NOT NULL DEFAULT '[]',
                estimated_minutes INTEGER NOT NULL DEFAULT 0,
                author_id UUID NOT NULL,
                author_name TEXT NOT NULL,
                author_level INTEGER NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                roster_snapshot JSONB NOT NULL DEFAULT '[]',
                rejection_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                submitted_at TIMESTAMPTZ,
                resolved_at TIMESTAMPTZ,
                CHECK ((status = 'rejected') = (rejection_reason IS NOT NULL))
            )",
            &[],
        )
        .await?;

    client
        .execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS proposal_votes (
                    id UUID PRIMARY KEY,
                    proposal_id UUID NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
                    voter_id UUID NOT NULL,
                    voter_name TEXT NOT NULL,
                    value VARCHAR(10) NOT NULL,
                    comment TEXT,
                    cast_at TIMESTAMPTZ NOT NULL,
                    CONSTRAINT {} UNIQUE (proposal_id, voter_id)
                )",
                VOTE_UNIQUE
            ),
            &[],
        )
        .await?;

    client
        .execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS content_records (
                    id UUID PRIMARY KEY,
                    proposal_id UUID REFERENCES proposals(id) ON DELETE SET NULL,
                    external_key TEXT,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    level INTEGER NOT NULL,
                    category VARCHAR(20) NOT NULL,
                    display_order INTEGER NOT NULL,
                    locked BOOLEAN NOT NULL,
                    estimated_minutes INTEGER NOT NULL DEFAULT 0,
                    source VARCHAR(20) NOT NULL,
                    published_at TIMESTAMPTZ NOT NULL,
                    CONSTRAINT {} UNIQUE (level, category, display_order)
                )",
                CONTENT_ORDER_UNIQUE
            ),
            &[],
        )
        .await?;

    client
        .execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON content_records(external_key)
                 WHERE external_key IS NOT NULL",
                CONTENT_EXTERNAL_KEY_UNIQUE
            ),
            &[],
        )
        .await?;

    client
        .execute(
            "CREATE TABLE IF NOT EXISTS migration_runs (
                run_id UUID PRIMARY KEY,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                success BOOLEAN NOT NULL,
                result JSONB NOT NULL
            )",
            &[],
        )
        .await?;

    // Create indexes for performance
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status)",
            &[],
        )
        .await;
    let _ = client
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_content_records_proposal_id ON content_records(proposal_id)",
            &[],
        )
        .await;

    debug!("Governance schema ready");
    info!("Database tables initialized");
    Ok(())
}
