//! Tribunal API - Content Governance Engine
//!
//! Maestro-level reviewers vote on curriculum proposals; a unanimous
//! approval publishes the content into every target level.
//!
//! GOVERNANCE FLOW:
//! - Draft: authored by a Mentor or Maestro, freely editable
//! - Pending: roster snapshot taken, votes collected until the deadline
//! - Approved / Rejected / Expired: terminal, approval publishes content
//!
//! The legacy static catalog is imported once through `POST /api/migrations`.

mod auth;
mod config;
mod db;
mod error;
mod governance;
mod models;
mod routes;
mod state;
mod store;

use crate::config::Settings;
use crate::governance::{GovernanceService, StaticRoster};
use crate::routes::create_router;
use crate::state::AppState;
use crate::store::{InMemoryRepository, PostgresRepository, Repository};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("Starting Tribunal - Content Governance Engine...");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        deadline_hours = settings.governance.vote_deadline_hours,
        reviewers = settings.governance.reviewers.len(),
        "Configuration loaded successfully"
    );

    let repo: Arc<dyn Repository> = match &settings.database {
        Some(db_config) => {
            let pool = db::init_pool(db_config).await?;
            db::create_tables(&pool).await?;
            Arc::new(PostgresRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, state lives in memory and is lost on restart");
            Arc::new(InMemoryRepository::new())
        }
    };

    let roster = Arc::new(StaticRoster::new(settings.governance.reviewers.clone()));
    let governance = GovernanceService::new(repo, roster, &settings.governance);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if settings.governance.sweep_interval_secs > 0 {
        spawn_expiry_sweep(
            governance.clone(),
            Duration::from_secs(settings.governance.sweep_interval_secs),
            shutdown_rx.clone(),
        );
    }

    let state = Arc::new(AppState::new(
        governance,
        settings.auth.jwt_secret.clone(),
        shutdown_rx,
    ));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("Server listening on http://{}", addr);
    info!("API Endpoints:");
    info!("   POST   /api/proposals              - Create draft proposal");
    info!("   GET    /api/proposals              - List proposals");
    info!("   GET    /api/proposals/{{id}}         - Proposal with votes and tally");
    info!("   PATCH  /api/proposals/{{id}}         - Edit draft or pending proposal");
    info!("   DELETE /api/proposals/{{id}}         - Delete unvoted proposal");
    info!("   POST   /api/proposals/{{id}}/submit  - Submit for review");
    info!("   POST   /api/proposals/{{id}}/votes   - Cast vote");
    info!("   POST   /api/proposals/{{id}}/publish - Republish approved proposal");
    info!("   POST   /api/proposals/expire       - Expire overdue proposals");
    info!("   GET    /api/content                - Published content by level");
    info!("   POST   /api/migrations             - Import legacy catalog");
    info!("   GET    /api/migrations/latest      - Last migration result");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tribunal_api=debug,tower_http=debug"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .init();
    }
}

/// Expire overdue pending proposals on a fixed interval until shutdown
fn spawn_expiry_sweep(
    governance: GovernanceService,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = governance.sweep_expired(Utc::now()).await {
                        error!(error = %e, "Expiry sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Expiry sweep stopped");
                    break;
                }
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }

    // Running migrations and the sweep watch this
    let _ = shutdown_tx.send(true);
}
