// ============================================================================
// Effects and Event Records
// ============================================================================
//
// An Effect is one atomic, already-decided mutation of one entity. Effects
// are computed once by the precondition stage, persisted as EventRecords,
// and replayed verbatim by the executor and by roll-forward recovery.
//
// ============================================================================

use crate::core::{ActorId, Address, Revision, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Create an entity that did not exist.
    Add {
        target: Address,
        value: Option<Value>,
    },

    /// Replace a field's value.
    Change {
        target: Address,
        old_revision: Revision,
        old_value: Option<Value>,
        new_value: Option<Value>,
    },

    /// Delete an entity (descendants get their own Remove effects first).
    Remove {
        target: Address,
        old_revision: Revision,
        /// Emitted as part of removing an ancestor.
        implied: bool,
    },
}

impl Effect {
    pub fn target(&self) -> &Address {
        match self {
            Effect::Add { target, .. } => target,
            Effect::Change { target, .. } => target,
            Effect::Remove { target, .. } => target,
        }
    }

    /// Revision the target had before this effect, if it existed.
    pub fn old_revision(&self) -> Option<Revision> {
        match self {
            Effect::Add { .. } => None,
            Effect::Change { old_revision, .. } | Effect::Remove { old_revision, .. } => {
                Some(*old_revision)
            }
        }
    }

    pub fn is_implied(&self) -> bool {
        matches!(self, Effect::Remove { implied: true, .. })
    }
}

/// One persisted effect, keyed by (model, revision, index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub revision: Revision,
    pub index: u32,
    pub actor: Option<ActorId>,
    pub effect: Effect,
    /// The owning change expanded into more than one effect.
    pub in_transaction: bool,
}

/// Everything a committed revision did, as returned to readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub revision: Revision,
    pub actor: Option<ActorId>,
    pub effects: Vec<Effect>,
}

impl ChangeEvent {
    pub fn is_transaction(&self) -> bool {
        self.effects.len() > 1
    }

    pub(crate) fn from_records(revision: Revision, records: Vec<EventRecord>) -> Self {
        let actor = records.first().and_then(|r| r.actor.clone());
        Self {
            revision,
            actor,
            effects: records.into_iter().map(|r| r.effect).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_target_and_revision() {
        let remove = Effect::Remove {
            target: Address::object("m", "o"),
            old_revision: 4,
            implied: true,
        };
        assert_eq!(remove.target(), &Address::object("m", "o"));
        assert_eq!(remove.old_revision(), Some(4));
        assert!(remove.is_implied());

        let add = Effect::Add {
            target: Address::field("m", "o", "f"),
            value: Some(Value::Integer(1)),
        };
        assert_eq!(add.old_revision(), None);
        assert!(!add.is_implied());
    }

    #[test]
    fn test_change_event_classification() {
        let record = |index| EventRecord {
            revision: 2,
            index,
            actor: Some(ActorId::new("alice")),
            effect: Effect::Add {
                target: Address::object("m", format!("o{}", index)),
                value: None,
            },
            in_transaction: true,
        };
        let event = ChangeEvent::from_records(2, vec![record(0), record(1)]);
        assert!(event.is_transaction());
        assert_eq!(event.actor, Some(ActorId::new("alice")));
        assert_eq!(event.effects.len(), 2);
    }
}
