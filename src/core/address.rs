// ============================================================================
// Hierarchical Addresses
// ============================================================================
//
// model -> object -> field. A lock on an address covers its whole subtree,
// so "contains" (ancestor-or-equal) is the relation every lock check uses.
//
// ============================================================================

use super::{EngineError, EntityKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    model: String,
    object: Option<String>,
    field: Option<String>,
}

impl Address {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            object: None,
            field: None,
        }
    }

    pub fn object(model: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            object: Some(object.into()),
            field: None,
        }
    }

    pub fn field(
        model: impl Into<String>,
        object: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            object: Some(object.into()),
            field: Some(field.into()),
        }
    }

    /// Address of a direct child of this entity.
    pub fn child(&self, id: impl Into<String>) -> Result<Self> {
        match self.kind() {
            EntityKind::Model => Ok(Self::object(self.model.clone(), id)),
            EntityKind::Object => Ok(Self {
                model: self.model.clone(),
                object: self.object.clone(),
                field: Some(id.into()),
            }),
            EntityKind::Field => Err(EngineError::InvalidAddress(format!(
                "field {} cannot have children",
                self
            ))),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match (&self.object, &self.field) {
            (None, _) => EntityKind::Model,
            (Some(_), None) => EntityKind::Object,
            (Some(_), Some(_)) => EntityKind::Field,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object.as_deref()
    }

    pub fn field_id(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// The id of this entity within its parent.
    pub fn id(&self) -> &str {
        self.field
            .as_deref()
            .or(self.object.as_deref())
            .unwrap_or(&self.model)
    }

    /// The root address of the model this address belongs to.
    pub fn model_address(&self) -> Self {
        Self::model(self.model.clone())
    }

    pub fn parent(&self) -> Option<Self> {
        match self.kind() {
            EntityKind::Model => None,
            EntityKind::Object => Some(self.model_address()),
            EntityKind::Field => Some(Self {
                model: self.model.clone(),
                object: self.object.clone(),
                field: None,
            }),
        }
    }

    /// Strict ancestors, nearest first.
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut cursor = self.parent();
        while let Some(addr) = cursor {
            cursor = addr.parent();
            out.push(addr);
        }
        out
    }

    /// True iff `self` is an ancestor of, or equal to, `other`.
    pub fn contains(&self, other: &Address) -> bool {
        if self.model != other.model {
            return false;
        }
        match (&self.object, &other.object) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) if a != b => false,
            (Some(_), Some(_)) => match (&self.field, &other.field) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(a), Some(b)) => a == b,
            },
        }
    }

    pub fn is_strict_ancestor_of(&self, other: &Address) -> bool {
        self != other && self.contains(other)
    }

    /// Two addresses overlap iff one contains the other.
    pub fn overlaps(&self, other: &Address) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.model)?;
        if let Some(object) = &self.object {
            write!(f, "/{}", object)?;
        }
        if let Some(field) = &self.field {
            write!(f, "/{}", field)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s
            .strip_prefix('/')
            .ok_or_else(|| EngineError::InvalidAddress(format!("'{}' must start with '/'", s)))?;
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(EngineError::InvalidAddress(format!(
                "'{}' has an empty component",
                s
            )));
        }
        match parts.as_slice() {
            [model] => Ok(Self::model(*model)),
            [model, object] => Ok(Self::object(*model, *object)),
            [model, object, field] => Ok(Self::field(*model, *object, *field)),
            _ => Err(EngineError::InvalidAddress(format!(
                "'{}' is deeper than model/object/field",
                s
            ))),
        }
    }
}
