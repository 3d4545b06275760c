// ============================================================================
// Change Manager
// ============================================================================
//
// Command pipeline for one model:
//
//   locks -> allocate revision -> wait for conflicting predecessors
//         -> check preconditions + record events -> apply + release
//
// The stages live in sibling modules as further `impl ChangeManager` blocks.
// Coordination happens only through the backing store; the per-model
// revision hints below are caches a fresh instance recomputes on its own.
//
// ============================================================================

use super::change::ChangeEvent;
use super::event_log::EventCommit;
use super::locks::LockSet;
use super::precondition::CheckOutcome;
use super::state::ChangeStatus;
use super::wait::WaitOutcome;
use crate::clock::{Clock, SystemClock};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::core::{ActorId, Address, EngineError, FIRST_REVISION, NO_REVISION, Result, Revision};
use crate::storage::codec::{EventCodec, MessagePackCodec};
use crate::storage::engine::BackingStore;
use crate::storage::entity::EntityRecord;
use crate::storage::records::RecordStore;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{Instrument, debug, field, info_span};
use uuid::Uuid;

/// Raw code returned for a failed command.
pub const FAILED: i64 = -1;
/// Raw code returned for a command that changed nothing.
pub const NOCHANGE: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Committed(Revision),
    NoChange,
    Failed,
}

impl CommandOutcome {
    /// Revision on success, otherwise [`FAILED`] or [`NOCHANGE`].
    pub fn code(&self) -> i64 {
        match self {
            CommandOutcome::Committed(revision) => *revision,
            CommandOutcome::NoChange => NOCHANGE,
            CommandOutcome::Failed => FAILED,
        }
    }

    pub fn revision(&self) -> Option<Revision> {
        match self {
            CommandOutcome::Committed(revision) => Some(*revision),
            _ => None,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Committed(revision) => write!(f, "committed@{}", revision),
            CommandOutcome::NoChange => write!(f, "NOCHANGE"),
            CommandOutcome::Failed => write!(f, "FAILED"),
        }
    }
}

/// Per-model revision hints. Pure performance caches: never trusted for
/// correctness, only used as scan starting points.
#[derive(Debug)]
pub struct ModelCoordinator {
    last_taken: AtomicI64,
    last_committed: AtomicI64,
}

impl ModelCoordinator {
    pub fn new() -> Self {
        Self {
            last_taken: AtomicI64::new(NO_REVISION),
            last_committed: AtomicI64::new(NO_REVISION),
        }
    }

    pub fn last_taken(&self) -> Revision {
        self.last_taken.load(Ordering::Acquire)
    }

    pub fn last_committed(&self) -> Revision {
        self.last_committed.load(Ordering::Acquire)
    }

    pub fn note_taken(&self, revision: Revision) {
        self.last_taken.fetch_max(revision, Ordering::AcqRel);
    }

    /// Record that every revision up to and including `revision` is terminal.
    pub fn note_committed(&self, revision: Revision) {
        self.last_committed.fetch_max(revision, Ordering::AcqRel);
        self.note_taken(revision);
    }
}

impl Default for ModelCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChangeManagerBuilder {
    store: Arc<dyn BackingStore>,
    model: String,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    codec: Arc<dyn EventCodec>,
}

impl ChangeManagerBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn EventCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn build(self) -> Result<ChangeManager> {
        self.config.validate()?;
        if self.model.is_empty() {
            return Err(EngineError::InvalidAddress("empty model id".to_string()));
        }
        let records = RecordStore::new(self.store, self.codec, self.config.max_cas_retries);
        Ok(ChangeManager {
            model: Address::model(self.model),
            records,
            clock: self.clock,
            config: self.config,
            coordinator: ModelCoordinator::new(),
            writer_id: Uuid::new_v4(),
        })
    }
}

/// Serializes commands against one model stored in a [`BackingStore`].
///
/// Any number of managers (in one process or many) may share a store and a
/// model; they coordinate only through change records.
pub struct ChangeManager {
    model: Address,
    records: RecordStore,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    coordinator: ModelCoordinator,
    writer_id: Uuid,
}

impl ChangeManager {
    pub fn builder(store: Arc<dyn BackingStore>, model: impl Into<String>) -> ChangeManagerBuilder {
        ChangeManagerBuilder {
            store,
            model: model.into(),
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            codec: Arc::new(MessagePackCodec),
        }
    }

    /// Manager with default config, wall clock and MessagePack events.
    pub fn new(store: Arc<dyn BackingStore>, model: impl Into<String>) -> Result<Self> {
        Self::builder(store, model).build()
    }

    pub fn model(&self) -> &Address {
        &self.model
    }

    pub fn writer_id(&self) -> Uuid {
        self.writer_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &ModelCoordinator {
        &self.coordinator
    }

    pub(crate) fn records(&self) -> &RecordStore {
        &self.records
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn model_id(&self) -> &str {
        self.model.model_id()
    }

    // ------------------------------------------------------------------
    // Public API
    // ------------------------------------------------------------------

    /// Run `command` through the full pipeline.
    ///
    /// Precondition failures and no-ops are outcomes, not errors; `Err` means
    /// the store failed or the protocol itself is broken.
    pub async fn execute_command(
        &self,
        command: &Command,
        actor: Option<&ActorId>,
    ) -> Result<CommandOutcome> {
        let model = command.validate()?;
        if model != self.model {
            return Err(EngineError::InvalidCommand(format!(
                "command for {} sent to manager of {}",
                model, self.model
            )));
        }

        let span = info_span!(
            "execute_command",
            model = %self.model,
            writer = %self.writer_id,
            actor = actor.map(|a| a.as_str()).unwrap_or("-"),
            revision = field::Empty,
        );
        self.run_pipeline(command, actor).instrument(span).await
    }

    async fn run_pipeline(&self, command: &Command, actor: Option<&ActorId>) -> Result<CommandOutcome> {
        let locks = LockSet::required_for(command);
        let record = self.allocate_revision(&locks, actor).await?;
        let revision = record.revision;
        tracing::Span::current().record("revision", revision);

        if let WaitOutcome::TakenOver(status) = self.wait_for_predecessors(revision, &locks).await? {
            debug!(revision, %status, "command finished while waiting");
            return Ok(CommandOutcome::Failed);
        }

        let outcome = match self.check_preconditions(revision, command, &locks).await? {
            CheckOutcome::Failed(reason) => {
                debug!(revision, %reason, "precondition failed");
                self.record_failure(revision).await?;
                CommandOutcome::Failed
            }
            CheckOutcome::NoChange => match self.commit_events(revision, actor, &[]).await? {
                EventCommit::NoChange => CommandOutcome::NoChange,
                _ => CommandOutcome::Failed,
            },
            CheckOutcome::Effects(effects) => {
                match self.commit_events(revision, actor, &effects).await? {
                    EventCommit::Executing => {
                        if self.apply_and_release(revision, &effects).await? {
                            CommandOutcome::Committed(revision)
                        } else {
                            CommandOutcome::Failed
                        }
                    }
                    _ => CommandOutcome::Failed,
                }
            }
        };
        debug!(revision, %outcome, "command finished");
        Ok(outcome)
    }

    /// Committed events of `revision`, or `None` if it failed, changed
    /// nothing or is not committed yet.
    pub async fn get_event_at(&self, revision: Revision) -> Result<Option<ChangeEvent>> {
        if revision < FIRST_REVISION {
            return Ok(None);
        }
        let Some(record) = self.records.load_change(self.model_id(), revision).await? else {
            return Ok(None);
        };
        if record.status != ChangeStatus::SuccessExecuted {
            return Ok(None);
        }
        let count = record.event_count.ok_or_else(|| {
            EngineError::Invariant(format!(
                "executed change {}@{} has no event count",
                self.model, revision
            ))
        })?;
        let events = self.records.load_events(self.model_id(), revision, count).await?;
        Ok(Some(ChangeEvent::from_records(revision, events)))
    }

    /// Committed events with revisions in `from..=to`, never past the
    /// current revision.
    pub async fn events_between(&self, from: Revision, to: Revision) -> Result<Vec<ChangeEvent>> {
        let upper = to.min(self.current_revision().await?);
        let mut events = Vec::new();
        for revision in from.max(FIRST_REVISION)..=upper {
            if let Some(event) = self.get_event_at(revision).await? {
                events.push(event);
            }
        }
        Ok(events)
    }

    pub fn first_revision(&self) -> Revision {
        FIRST_REVISION
    }

    pub async fn change_status(&self, revision: Revision) -> Result<Option<ChangeStatus>> {
        Ok(self
            .records
            .load_change(self.model_id(), revision)
            .await?
            .map(|record| record.status))
    }

    pub async fn get_entity(&self, address: &Address) -> Result<Option<EntityRecord>> {
        self.check_in_model(address)?;
        self.records.load_entity(address).await
    }

    /// Direct children of a model or object.
    pub async fn children(&self, address: &Address) -> Result<Vec<EntityRecord>> {
        self.check_in_model(address)?;
        Ok(self
            .records
            .load_descendants(address)
            .await?
            .into_iter()
            .filter(|entity| entity.parent.as_ref() == Some(address))
            .collect())
    }

    fn check_in_model(&self, address: &Address) -> Result<()> {
        if address.model_id() != self.model_id() {
            return Err(EngineError::InvalidAddress(format!(
                "{} is outside model {}",
                address, self.model
            )));
        }
        Ok(())
    }
}
