// ============================================================================
// Recovery
// ============================================================================
//
// Takes over a change whose owner stopped heartbeating. An EXECUTING change
// has durable events and is rolled forward; anything earlier is marked
// FAILED_TIMEOUT. The takeover itself is a CAS on the change record that
// re-checks the stall, so two recoverers (or a recoverer and a revived owner)
// cannot both claim the same record.
//
// ============================================================================

use super::manager::ChangeManager;
use super::state::ChangeStatus;
use crate::core::{EngineError, Result, Revision};
use crate::storage::records::RecordUpdate;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Events were replayed and the change is SUCCESS_EXECUTED.
    RolledForward,
    /// The change was marked FAILED_TIMEOUT.
    Failed,
    /// Someone else finished the change first.
    AlreadyTerminal(ChangeStatus),
    /// The owner heartbeated in time; nothing was done.
    StillAlive,
}

impl RecoveryOutcome {
    /// The change is now terminal and successful.
    pub fn is_success(&self) -> bool {
        match self {
            RecoveryOutcome::RolledForward => true,
            RecoveryOutcome::AlreadyTerminal(status) => status.is_success(),
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecoveryOutcome::StillAlive)
    }
}

impl ChangeManager {
    /// Recover `revision` if its owner has stalled.
    pub async fn recover(&self, revision: Revision) -> Result<RecoveryOutcome> {
        let now = self.clock().now();
        let timeout = self.config().heartbeat_timeout();

        let update = self
            .records()
            .update_change(self.model_id(), revision, |record| {
                if !record.is_stalled(now, timeout) {
                    return Ok(false);
                }
                if record.status.can_roll_forward() {
                    // Claim it: other recoverers now see a live heartbeat
                    record.last_activity = now;
                } else {
                    record.advance(ChangeStatus::FailedTimeout)?;
                }
                Ok(true)
            })
            .await?;

        match update {
            RecordUpdate::Missing => Err(EngineError::Invariant(format!(
                "recovery of {}@{}: change record does not exist",
                self.model(),
                revision
            ))),
            RecordUpdate::Unchanged(record) if record.is_terminal() => {
                debug!(revision, status = %record.status, "nothing to recover");
                Ok(RecoveryOutcome::AlreadyTerminal(record.status))
            }
            RecordUpdate::Unchanged(_) => Ok(RecoveryOutcome::StillAlive),
            RecordUpdate::Written(record) if record.status == ChangeStatus::FailedTimeout => {
                warn!(
                    revision,
                    actor = record.actor.as_ref().map(|a| a.as_str()).unwrap_or("-"),
                    "stalled change marked FAILED_TIMEOUT"
                );
                self.coordinator().note_taken(revision);
                Ok(RecoveryOutcome::Failed)
            }
            RecordUpdate::Written(record) => {
                let count = record.event_count.ok_or_else(|| {
                    EngineError::Invariant(format!(
                        "executing change {}@{} has no event count",
                        self.model(),
                        revision
                    ))
                })?;
                warn!(revision, events = count, "rolling forward stalled change");
                let events = self
                    .records()
                    .load_events(self.model_id(), revision, count)
                    .await?;
                let effects: Vec<_> = events.into_iter().map(|event| event.effect).collect();
                if self.apply_and_release(revision, &effects).await? {
                    info!(revision, "stalled change rolled forward");
                    Ok(RecoveryOutcome::RolledForward)
                } else {
                    let status = self.change_status(revision).await?.unwrap_or(record.status);
                    Ok(RecoveryOutcome::AlreadyTerminal(status))
                }
            }
        }
    }

    /// Recover every stalled change between the committed prefix and the
    /// highest revision known to be taken. Returns how many were touched.
    pub async fn recover_pending(&self) -> Result<usize> {
        let start = self.current_revision().await? + 1;
        let mut recovered = 0;
        let mut revision = start;
        loop {
            let Some(record) = self.records().load_change(self.model_id(), revision).await? else {
                break;
            };
            self.coordinator().note_taken(revision);
            if !record.is_terminal() && self.recover(revision).await?.is_terminal() {
                recovered += 1;
            }
            revision += 1;
        }
        if recovered > 0 {
            info!(from = start, to = revision - 1, recovered, "recovered pending changes");
        }
        Ok(recovered)
    }
}
