//! Application configuration module
//!
//! Settings are layered: built-in defaults, then an optional `tribunal.toml`,
//! then `TRIBUNAL__SECTION__KEY` environment variables, then the flat
//! deployment variables (`HOST`, `PORT`, `DATABASE_URL`, `JWT_SECRET`,
//! `ALLOWED_ORIGINS`).

use crate::governance::models::Reviewer;
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

const DEV_JWT_SECRET: &str = "tribunal-dev-secret-change-in-production";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// Database configuration, parsed from a connection URL
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Bearer-token verification
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

/// Governance rules and the in-process roster
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Time a pending proposal may wait before it expires
    pub vote_deadline_hours: u32,
    /// Publisher retries after a display-order conflict
    pub publish_max_retries: u32,
    pub maestro_level: u32,
    pub authoring_levels: Vec<u32>,
    pub override_levels: Vec<u32>,
    pub override_user_ids: Vec<Uuid>,
    /// Served by the static roster provider
    pub reviewers: Vec<Reviewer>,
    /// Seconds between expiry sweeps; 0 disables the sweep task
    pub sweep_interval_secs: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            vote_deadline_hours: 168,
            publish_max_retries: 3,
            maestro_level: 5,
            authoring_levels: vec![4, 5],
            override_levels: vec![6],
            override_user_ids: Vec::new(),
            reviewers: Vec::new(),
            sweep_interval_secs: 300,
        }
    }
}

impl GovernanceConfig {
    pub fn vote_deadline(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.vote_deadline_hours))
    }
}

/// Shape of the layered sources before post-processing
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    server: ServerConfig,
    database_url: Option<String>,
    max_pool_size: Option<usize>,
    cors: CorsConfig,
    auth: AuthConfig,
    governance: GovernanceConfig,
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    /// `None` runs on the in-memory repository
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub governance: GovernanceConfig,
}

impl Settings {
    /// Load and validate settings from every source
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let origins: Option<Vec<String>> = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect());

        let sources = ::config::Config::builder()
            .add_source(::config::File::with_name("tribunal").required(false))
            .add_source(
                ::config::Environment::with_prefix("TRIBUNAL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("governance.authoring_levels")
                    .with_list_parse_key("governance.override_levels")
                    .with_list_parse_key("governance.override_user_ids"),
            )
            .set_override_option("server.host", std::env::var("HOST").ok())?
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("max_pool_size", std::env::var("DB_MAX_CONNECTIONS").ok())?
            .set_override_option("auth.jwt_secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("cors.allowed_origins", origins)?
            .build()?;

        let settings = Self::from_config(sources)?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_config(sources: ::config::Config) -> Result<Self, ConfigError> {
        let raw: RawSettings = sources.try_deserialize()?;

        let database = raw
            .database_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| Self::parse_database_url(&url, raw.max_pool_size.unwrap_or(10)))
            .transpose()?;

        let mut auth = raw.auth;
        if auth.jwt_secret.is_empty() {
            warn!("JWT_SECRET not set, using default (INSECURE - set in production!)");
            auth.jwt_secret = DEV_JWT_SECRET.to_string();
        }

        Ok(Self {
            server: raw.server,
            database,
            cors: raw.cors,
            auth,
            governance: raw.governance,
        })
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gov = &self.governance;
        if gov.vote_deadline_hours == 0 {
            return Err(ConfigError::InvalidValue(
                "governance.vote_deadline_hours must be positive".to_string(),
            ));
        }
        if gov.publish_max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "governance.publish_max_retries must be positive".to_string(),
            ));
        }
        if !gov.authoring_levels.contains(&gov.maestro_level) {
            return Err(ConfigError::InvalidValue(format!(
                "governance.maestro_level {} must be one of the authoring levels {:?}",
                gov.maestro_level, gov.authoring_levels
            )));
        }
        if let Some(stray) = gov.reviewers.iter().find(|r| r.level != gov.maestro_level) {
            warn!(
                reviewer = %stray.name,
                reviewer_level = stray.level,
                "Roster entry not at Maestro level will never enter a snapshot"
            );
        }
        Ok(())
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str, max_pool_size: usize) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        // Managed hosts like Neon always need TLS
        let require_tls = host.contains("neon.tech")
            || parsed
                .query_pairs()
                .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            port: parsed.port().unwrap_or(5432),
            user: parsed.username().to_string(),
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            host,
            database,
            max_pool_size,
            require_tls,
        })
    }
}
