use serde::{Deserialize, Serialize};
use std::fmt;

/// Revision number of a model's change log. Allocated densely from 0.
pub type Revision = i64;

/// First revision any model can hold.
pub const FIRST_REVISION: Revision = 0;

/// Revision reported for an entity or model that has no committed change yet.
pub const NO_REVISION: Revision = -1;

/// Identity of the party that issued a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ActorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Kind of addressable entity in a model tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Model,
    Object,
    Field,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Model => write!(f, "model"),
            EntityKind::Object => write!(f, "object"),
            EntityKind::Field => write!(f, "field"),
        }
    }
}
