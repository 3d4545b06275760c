// ============================================================================
// Lock Algebra
// ============================================================================
//
// A lock on an address covers the whole subtree rooted there. Two lock sets
// conflict iff some address of one is an ancestor-or-equal of some address of
// the other. Locks are advisory: only the wait scan enforces them.
//
// ============================================================================

use crate::command::Command;
use crate::core::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSet(BTreeSet<Address>);

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks needed to execute `command`: the changed-entity address of every
    /// step, reduced to the maximal ones under the ancestor relation.
    pub fn required_for(command: &Command) -> Self {
        let mut locks = Self::new();
        for step in command.steps() {
            locks.insert(step.changed_entity().clone());
        }
        locks
    }

    /// Add a lock, keeping the set minimal: an address already implied by a
    /// more general lock is dropped, and locks implied by the new one go.
    pub fn insert(&mut self, address: Address) {
        if self.0.iter().any(|held| held.contains(&address)) {
            return;
        }
        self.0.retain(|held| !address.contains(held));
        self.0.insert(address);
    }

    pub fn conflicts_with(&self, other: &LockSet) -> bool {
        self.0
            .iter()
            .any(|mine| other.0.iter().any(|theirs| mine.overlaps(theirs)))
    }

    /// Whether `address` lies inside the subtree of some lock.
    pub fn covers(&self, address: &Address) -> bool {
        self.0.iter().any(|held| held.contains(address))
    }

    /// Reads a change may perform against the entity store: anything inside
    /// its locks, plus the existence of strict ancestors of a lock.
    pub fn permits_read(&self, address: &Address) -> bool {
        self.covers(address) || self.0.iter().any(|held| address.is_strict_ancestor_of(held))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Address> for LockSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut locks = LockSet::new();
        for address in iter {
            locks.insert(address);
        }
        locks
    }
}
