//! Acting user resolution
//!
//! Every audit entry names a user. Requests that carry no identity, and
//! background jobs like the retention scheduler, act as the reserved system
//! user.

use serde::{Deserialize, Serialize};
use std::env;

/// Reserved id for anonymous and system-initiated actions
pub const SYSTEM_USER_ID: &str = "system";
pub const SYSTEM_USER_NAME: &str = "System";

pub const ACTOR_ID_ENV: &str = "BACKSTOP_ACTOR_ID";
pub const ACTOR_NAME_ENV: &str = "BACKSTOP_ACTOR_NAME";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub name: String,
}

impl Actor {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_USER_ID, SYSTEM_USER_NAME)
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_USER_ID
    }

    /// Build an actor from optional id/name parts. A missing or blank id means
    /// the system user; a missing name falls back to the id.
    pub fn from_parts(id: Option<&str>, name: Option<&str>) -> Self {
        match id.map(str::trim).filter(|s| !s.is_empty()) {
            None => Self::system(),
            Some(id) => {
                let name = name.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(id);
                Self::new(id, name)
            }
        }
    }
}

/// Resolves who is performing the current operation
pub trait IdentityProvider: Send + Sync {
    fn current_actor(&self) -> Actor;
}

/// Always the system user
#[derive(Debug, Clone, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn current_actor(&self) -> Actor {
        Actor::system()
    }
}

/// Reads `BACKSTOP_ACTOR_ID` / `BACKSTOP_ACTOR_NAME`, used by the CLI
#[derive(Debug, Clone, Default)]
pub struct EnvIdentity;

impl IdentityProvider for EnvIdentity {
    fn current_actor(&self) -> Actor {
        let id = env::var(ACTOR_ID_ENV).ok();
        let name = env::var(ACTOR_NAME_ENV).ok();
        Actor::from_parts(id.as_deref(), name.as_deref())
    }
}

/// A fixed actor, e.g. one resolved from request headers
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Actor);

impl IdentityProvider for StaticIdentity {
    fn current_actor(&self) -> Actor {
        self.0.clone()
    }
}
