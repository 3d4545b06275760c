use crate::core::{Address, EntityKind, Revision, Value};
use serde::{Deserialize, Serialize};

/// Kind-specific part of an entity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityBody {
    Model,
    Object,
    Field { value: Option<Value> },
}

/// Stored state of one model, object or field. Only effects write these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub address: Address,
    /// Revision of the last change that created or modified this entity.
    pub revision: Revision,
    pub parent: Option<Address>,
    pub body: EntityBody,
}

impl EntityRecord {
    pub fn new(address: Address, revision: Revision, value: Option<Value>) -> Self {
        let body = match address.kind() {
            EntityKind::Model => EntityBody::Model,
            EntityKind::Object => EntityBody::Object,
            EntityKind::Field => EntityBody::Field { value },
        };
        let parent = address.parent();
        Self {
            address,
            revision,
            parent,
            body,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self.body {
            EntityBody::Model => EntityKind::Model,
            EntityBody::Object => EntityKind::Object,
            EntityBody::Field { .. } => EntityKind::Field,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            EntityBody::Field { value } => value.as_ref(),
            _ => None,
        }
    }
}
