//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::governance::GovernanceService;
use std::sync::Arc;
use tokio::sync::watch;

/// Application state shared across all handlers
pub struct AppState {
    /// Every governance operation goes through here
    pub governance: GovernanceService,

    /// Secret used to verify bearer tokens
    pub jwt_secret: String,

    /// Flips to true once the server starts shutting down
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        governance: GovernanceService,
        jwt_secret: String,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            governance,
            jwt_secret,
            shutdown,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
