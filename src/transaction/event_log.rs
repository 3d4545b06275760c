// ============================================================================
// Event Log
// ============================================================================
//
// Persists the decided effects of a change, then publishes them by flipping
// the change record to EXECUTING with the event count. Events written before
// the flip are invisible: readers and roll-forward go through the count.
//
// ============================================================================

use super::change::{Effect, EventRecord};
use super::manager::ChangeManager;
use super::state::ChangeStatus;
use crate::core::{ActorId, EngineError, Result, Revision};
use crate::storage::records::RecordUpdate;
use futures::future::try_join_all;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCommit {
    /// Events are durable and the change is EXECUTING.
    Executing,
    /// No effects; the change is SUCCESS_NOCHANGE.
    NoChange,
    /// Another writer made the change terminal first.
    TakenOver(ChangeStatus),
}

impl ChangeManager {
    pub(crate) async fn commit_events(
        &self,
        revision: Revision,
        actor: Option<&ActorId>,
        effects: &[Effect],
    ) -> Result<EventCommit> {
        if effects.is_empty() {
            return self.finish_open(revision, ChangeStatus::SuccessNochange).await.map(
                |status| match status {
                    None => EventCommit::NoChange,
                    Some(status) => EventCommit::TakenOver(status),
                },
            );
        }

        let status = self.touch(revision).await?;
        if status.is_terminal() {
            return Ok(EventCommit::TakenOver(status));
        }

        let count = u32::try_from(effects.len()).map_err(|_| {
            EngineError::InvalidCommand(format!("{} effects in one change", effects.len()))
        })?;
        let in_transaction = effects.len() > 1;
        let writes = effects.iter().enumerate().map(|(index, effect)| {
            let event = EventRecord {
                revision,
                index: index as u32,
                actor: actor.cloned(),
                effect: effect.clone(),
                in_transaction,
            };
            async move { self.records().put_event(self.model_id(), &event).await }
        });
        try_join_all(writes).await?;

        let now = self.clock().now();
        let update = self
            .records()
            .update_change(self.model_id(), revision, |record| {
                if record.is_terminal() {
                    return Ok(false);
                }
                record.event_count = Some(count);
                record.last_activity = now;
                record.advance(ChangeStatus::Executing)?;
                Ok(true)
            })
            .await?;

        match update {
            RecordUpdate::Written(_) => {
                debug!(revision, events = count, "events recorded");
                Ok(EventCommit::Executing)
            }
            RecordUpdate::Unchanged(record) => {
                warn!(revision, status = %record.status, "change was taken over before its events were published");
                Ok(EventCommit::TakenOver(record.status))
            }
            RecordUpdate::Missing => Err(missing(self, revision)),
        }
    }

    /// Mark an open change FAILED_PRECONDITIONS.
    pub(crate) async fn record_failure(&self, revision: Revision) -> Result<()> {
        if let Some(status) = self
            .finish_open(revision, ChangeStatus::FailedPreconditions)
            .await?
        {
            debug!(revision, %status, "failure not recorded, change already terminal");
        }
        Ok(())
    }

    /// Refresh the heartbeat of our own open change. Returns its status,
    /// which is terminal if another writer took it over.
    pub(crate) async fn touch(&self, revision: Revision) -> Result<ChangeStatus> {
        let now = self.clock().now();
        let update = self
            .records()
            .update_change(self.model_id(), revision, |record| {
                if record.is_terminal() || record.last_activity >= now {
                    return Ok(false);
                }
                record.last_activity = now;
                Ok(true)
            })
            .await?;
        update
            .record()
            .map(|record| record.status)
            .ok_or_else(|| missing(self, revision))
    }

    /// Move a change that has not reached EXECUTING to a terminal `status`.
    /// Returns the status found instead if the record was already terminal.
    async fn finish_open(
        &self,
        revision: Revision,
        status: ChangeStatus,
    ) -> Result<Option<ChangeStatus>> {
        let update = self
            .records()
            .update_change(self.model_id(), revision, |record| {
                if record.is_terminal() {
                    return Ok(false);
                }
                record.advance(status)?;
                Ok(true)
            })
            .await?;
        match update {
            RecordUpdate::Written(_) => {
                self.advance_commit_hint(revision);
                Ok(None)
            }
            RecordUpdate::Unchanged(record) => Ok(Some(record.status)),
            RecordUpdate::Missing => Err(missing(self, revision)),
        }
    }
}

fn missing(manager: &ChangeManager, revision: Revision) -> EngineError {
    EngineError::Invariant(format!(
        "own change record {}@{} disappeared",
        manager.model(),
        revision
    ))
}
