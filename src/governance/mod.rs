//! Content governance engine
//!
//! Proposals move through unanimous Maestro review into published,
//! level-gated curriculum. The legacy catalog enters through a one-shot,
//! idempotent migration.

pub mod migration;
pub mod models;
pub mod permissions;
pub mod publisher;
pub mod roster;
pub mod service;
pub mod state_machine;
pub mod tally;

#[cfg(test)]
pub(crate) mod testing;

pub use roster::{RosterProvider, StaticRoster};
pub use service::GovernanceService;
