//! Authentication module
//!
//! Verifies bearer tokens issued by the identity provider and turns their
//! claims into the engine's `Actor`. Tokens are never issued here.

mod jwt;
mod middleware;

pub use jwt::{decode_token, Claims};
pub use middleware::{auth_middleware, bearer_claims};

use crate::governance::models::Actor;

impl From<&Claims> for Actor {
    fn from(claims: &Claims) -> Self {
        Actor {
            id: claims.sub,
            name: claims.name.clone(),
            level: claims.level,
        }
    }
}
