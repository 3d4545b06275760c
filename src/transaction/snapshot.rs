// ============================================================================
// Lock-Scoped Snapshot
// ============================================================================
//
// Read-only view of the entity store as of `revision - 1`, restricted to the
// change's lock scope. Once every conflicting predecessor is terminal, the
// live entity records inside the scope are exactly that state: earlier
// non-conflicting changes never touch the scope, later conflicting ones are
// still waiting on us.
//
// The overlay holds entities as the earlier steps of the same command left
// them, so a transaction's step N sees steps 0..N.
//
// ============================================================================

use super::change::Effect;
use super::locks::LockSet;
use crate::core::{Address, EngineError, Result, Revision};
use crate::storage::entity::{EntityBody, EntityRecord};
use crate::storage::records::RecordStore;
use std::collections::BTreeMap;

pub struct SnapshotView<'a> {
    records: &'a RecordStore,
    locks: &'a LockSet,
    revision: Revision,
    /// `None` marks an entity removed by an earlier step.
    overlay: BTreeMap<Address, Option<EntityRecord>>,
}

impl<'a> SnapshotView<'a> {
    pub fn new(records: &'a RecordStore, locks: &'a LockSet, revision: Revision) -> Self {
        Self {
            records,
            locks,
            revision,
            overlay: BTreeMap::new(),
        }
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub async fn get(&self, address: &Address) -> Result<Option<EntityRecord>> {
        if !self.locks.permits_read(address) {
            return Err(EngineError::Invariant(format!(
                "read of {} outside lock scope at revision {}",
                address, self.revision
            )));
        }
        if let Some(entry) = self.overlay.get(address) {
            return Ok(entry.clone());
        }
        let entity = self.records.load_entity(address).await?;
        if let Some(entity) = &entity {
            self.check_not_from_future(entity)?;
        }
        Ok(entity)
    }

    pub async fn exists(&self, address: &Address) -> Result<bool> {
        Ok(self.get(address).await?.is_some())
    }

    /// Strict descendants of a locked address, parents before children.
    pub async fn descendants(&self, address: &Address) -> Result<Vec<EntityRecord>> {
        if !self.locks.covers(address) {
            return Err(EngineError::Invariant(format!(
                "subtree scan of {} outside lock scope at revision {}",
                address, self.revision
            )));
        }
        let mut merged: BTreeMap<Address, EntityRecord> = BTreeMap::new();
        for entity in self.records.load_descendants(address).await? {
            self.check_not_from_future(&entity)?;
            merged.insert(entity.address.clone(), entity);
        }
        for (addr, entry) in &self.overlay {
            if !address.is_strict_ancestor_of(addr) {
                continue;
            }
            match entry {
                Some(entity) => {
                    merged.insert(addr.clone(), entity.clone());
                }
                None => {
                    merged.remove(addr);
                }
            }
        }
        // Address order puts an object before its fields
        Ok(merged.into_values().collect())
    }

    /// Fold an effect decided by an earlier step into the view.
    pub fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::Add { target, value } => {
                let entity = EntityRecord::new(target.clone(), self.revision, value.clone());
                self.overlay.insert(target.clone(), Some(entity));
            }
            Effect::Change {
                target, new_value, ..
            } => {
                let mut entity = EntityRecord::new(target.clone(), self.revision, None);
                entity.body = EntityBody::Field {
                    value: new_value.clone(),
                };
                self.overlay.insert(target.clone(), Some(entity));
            }
            Effect::Remove { target, .. } => {
                self.overlay.insert(target.clone(), None);
            }
        }
    }

    fn check_not_from_future(&self, entity: &EntityRecord) -> Result<()> {
        if entity.revision >= self.revision {
            return Err(EngineError::Invariant(format!(
                "{} is at revision {} while checking revision {}",
                entity.address, entity.revision, self.revision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::storage::codec::MessagePackCodec;
    use crate::storage::memory::InMemoryStore;
    use std::sync::Arc;

    async fn seeded() -> RecordStore {
        let records = RecordStore::new(Arc::new(InMemoryStore::new()), Arc::new(MessagePackCodec), 8);
        for address in [
            Address::model("m"),
            Address::object("m", "o"),
            Address::field("m", "o", "f"),
            Address::object("m", "p"),
        ] {
            records
                .put_entity(&EntityRecord::new(address, 1, Some(Value::Integer(1))))
                .await
                .unwrap();
        }
        records
    }

    #[tokio::test]
    async fn test_reads_outside_scope_are_refused() {
        let records = seeded().await;
        let locks: LockSet = [Address::object("m", "o")].into_iter().collect();
        let view = SnapshotView::new(&records, &locks, 5);

        assert!(view.exists(&Address::field("m", "o", "f")).await.unwrap());
        assert!(view.exists(&Address::model("m")).await.unwrap());
        assert!(matches!(
            view.get(&Address::object("m", "p")).await,
            Err(EngineError::Invariant(_))
        ));
        assert!(view.descendants(&Address::model("m")).await.is_err());
    }

    #[tokio::test]
    async fn test_overlay_shadows_store() {
        let records = seeded().await;
        let locks: LockSet = [Address::object("m", "o")].into_iter().collect();
        let mut view = SnapshotView::new(&records, &locks, 5);

        view.apply(&Effect::Remove {
            target: Address::field("m", "o", "f"),
            old_revision: 1,
            implied: false,
        });
        view.apply(&Effect::Add {
            target: Address::field("m", "o", "g"),
            value: None,
        });

        assert!(!view.exists(&Address::field("m", "o", "f")).await.unwrap());
        let below: Vec<Address> = view
            .descendants(&Address::object("m", "o"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.address)
            .collect();
        assert_eq!(below, vec![Address::field("m", "o", "g")]);
    }

    #[tokio::test]
    async fn test_entity_newer_than_snapshot_is_invariant_violation() {
        let records = seeded().await;
        let locks: LockSet = [Address::object("m", "o")].into_iter().collect();
        let view = SnapshotView::new(&records, &locks, 1);
        assert!(matches!(
            view.get(&Address::object("m", "o")).await,
            Err(EngineError::Invariant(_))
        ));
    }
}
