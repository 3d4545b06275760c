// ============================================================================
// Typed Record Access
// ============================================================================
//
// Change, event and entity records on top of a raw BackingStore. Every
// read-modify-write goes through SingleRecordTxn, which is a compare-and-swap
// on exactly one key: begin reads the current bytes, commit swaps only if
// they are still the same, abort just drops the snapshot.
//
// ============================================================================

use super::codec::EventCodec;
use super::engine::BackingStore;
use super::entity::EntityRecord;
use super::keys::{RecordKey, descendants_prefix};
use crate::core::{Address, EngineError, Result, Revision};
use crate::transaction::change::EventRecord;
use crate::transaction::state::ChangeRecord;
use futures::future::try_join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Read-modify-write on one key.
pub struct SingleRecordTxn<'a> {
    store: &'a dyn BackingStore,
    key: String,
    original: Option<Vec<u8>>,
}

impl<'a> SingleRecordTxn<'a> {
    pub async fn begin(store: &'a dyn BackingStore, key: String) -> Result<Self> {
        let original = store.get(&key).await?;
        Ok(Self {
            store,
            key,
            original,
        })
    }

    pub fn current(&self) -> Option<&[u8]> {
        self.original.as_deref()
    }

    /// Returns false when another writer got to the record first.
    pub async fn commit(self, new: Option<Vec<u8>>) -> Result<bool> {
        self.store
            .compare_and_swap(&self.key, self.original.as_deref(), new)
            .await
    }

    pub fn abort(self) {}
}

/// Result of a guarded update of one change record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordUpdate {
    /// The closure changed the record and the write went through.
    Written(ChangeRecord),
    /// The closure declined to write; this is the record as read.
    Unchanged(ChangeRecord),
    Missing,
}

impl RecordUpdate {
    pub fn record(&self) -> Option<&ChangeRecord> {
        match self {
            RecordUpdate::Written(rec) | RecordUpdate::Unchanged(rec) => Some(rec),
            RecordUpdate::Missing => None,
        }
    }

    pub fn into_record(self) -> Option<ChangeRecord> {
        match self {
            RecordUpdate::Written(rec) | RecordUpdate::Unchanged(rec) => Some(rec),
            RecordUpdate::Missing => None,
        }
    }
}

#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn BackingStore>,
    codec: Arc<dyn EventCodec>,
    max_cas_retries: u32,
}

impl RecordStore {
    pub fn new(
        store: Arc<dyn BackingStore>,
        codec: Arc<dyn EventCodec>,
        max_cas_retries: u32,
    ) -> Self {
        Self {
            store,
            codec,
            max_cas_retries: max_cas_retries.max(1),
        }
    }

    pub fn backing(&self) -> &dyn BackingStore {
        self.store.as_ref()
    }

    // ------------------------------------------------------------------
    // Change records
    // ------------------------------------------------------------------

    pub async fn load_change(&self, model: &str, revision: Revision) -> Result<Option<ChangeRecord>> {
        let key = RecordKey::change(model, revision).encode();
        match self.store.get(&key).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Create-if-absent. Returns false if the revision is already taken.
    pub async fn create_change(&self, record: &ChangeRecord) -> Result<bool> {
        let key = RecordKey::change(&record.model, record.revision).encode();
        let txn = SingleRecordTxn::begin(self.store.as_ref(), key).await?;
        if txn.current().is_some() {
            txn.abort();
            return Ok(false);
        }
        txn.commit(Some(encode_record(record)?)).await
    }

    /// Guarded read-modify-write of a change record. `mutate` returns
    /// `Ok(false)` to leave the record alone; it may run several times if
    /// other writers race on the same record.
    pub async fn update_change<F>(
        &self,
        model: &str,
        revision: Revision,
        mut mutate: F,
    ) -> Result<RecordUpdate>
    where
        F: FnMut(&mut ChangeRecord) -> Result<bool>,
    {
        let key = RecordKey::change(model, revision).encode();
        for _ in 0..self.max_cas_retries {
            let txn = SingleRecordTxn::begin(self.store.as_ref(), key.clone()).await?;
            let Some(bytes) = txn.current() else {
                txn.abort();
                return Ok(RecordUpdate::Missing);
            };
            let mut record: ChangeRecord = decode_record(bytes)?;
            if !mutate(&mut record)? {
                txn.abort();
                return Ok(RecordUpdate::Unchanged(record));
            }
            let encoded = encode_record(&record)?;
            if txn.commit(Some(encoded)).await? {
                return Ok(RecordUpdate::Written(record));
            }
        }
        Err(EngineError::Contention {
            key,
            attempts: self.max_cas_retries,
        })
    }

    // ------------------------------------------------------------------
    // Event records
    // ------------------------------------------------------------------

    pub async fn put_event(&self, model: &str, event: &EventRecord) -> Result<()> {
        let change = RecordKey::change(model, event.revision);
        let key = RecordKey::event_of(&change, event.index)?.encode();
        self.store.put(&key, self.codec.encode(event)?).await
    }

    /// Load events `0..count` of a change. A missing event is an invariant
    /// violation: the count is only published after every event is written.
    pub async fn load_events(
        &self,
        model: &str,
        revision: Revision,
        count: u32,
    ) -> Result<Vec<EventRecord>> {
        let change = RecordKey::change(model, revision);
        let keys = (0..count)
            .map(|index| RecordKey::event_of(&change, index).map(|k| k.encode()))
            .collect::<Result<Vec<_>>>()?;
        let loaded = try_join_all(keys.iter().map(|key| self.store.get(key))).await?;
        keys.iter()
            .zip(loaded)
            .map(|(key, bytes)| {
                let bytes = bytes.ok_or_else(|| {
                    EngineError::Invariant(format!("event record {} is missing", key))
                })?;
                self.codec.decode(&bytes)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Entity records
    // ------------------------------------------------------------------

    pub async fn load_entity(&self, address: &Address) -> Result<Option<EntityRecord>> {
        let key = RecordKey::entity(address).encode();
        match self.store.get(&key).await? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put_entity(&self, entity: &EntityRecord) -> Result<()> {
        let key = RecordKey::entity(&entity.address).encode();
        self.store.put(&key, encode_record(entity)?).await
    }

    pub async fn delete_entity(&self, address: &Address) -> Result<()> {
        let key = RecordKey::entity(address).encode();
        self.store.delete(&key).await
    }

    /// All strict descendants of `address`, in key order (parents before
    /// their children).
    pub async fn load_descendants(&self, address: &Address) -> Result<Vec<EntityRecord>> {
        let prefix = descendants_prefix(address);
        self.store
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .map(|(_, bytes)| decode_record(&bytes))
            .collect()
    }
}

fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(record)?)
}

fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
