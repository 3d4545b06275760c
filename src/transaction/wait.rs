// ============================================================================
// Waiting for Predecessors
// ============================================================================
//
// The only blocking stage. Walks down from our revision to the committed
// prefix and polls every open predecessor whose locks conflict with ours
// until it is terminal. A predecessor that stops heartbeating is recovered
// by us, so a crashed writer holds its locks for at most one timeout.
//
// ============================================================================

use super::locks::LockSet;
use super::manager::ChangeManager;
use super::state::{ChangeRecord, ChangeStatus};
use crate::core::{EngineError, Result, Revision};
use tracing::{debug, warn};

/// How the wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// No conflicting predecessor is open any more.
    Clear,
    /// Someone finished our own change while we were waiting.
    TakenOver(ChangeStatus),
}

impl ChangeManager {
    pub(crate) async fn wait_for_predecessors(
        &self,
        revision: Revision,
        locks: &LockSet,
    ) -> Result<WaitOutcome> {
        let floor = self.coordinator().last_committed();
        let mut lowest_open: Option<Revision> = None;

        for predecessor in (floor + 1..revision).rev() {
            let record = self.load_predecessor(predecessor).await?;
            record.check_lock_invariant()?;
            let Some(theirs) = record.held_locks() else {
                continue;
            };
            if !theirs.conflicts_with(locks) {
                lowest_open = Some(predecessor);
                continue;
            }
            debug!(revision, predecessor, "waiting for conflicting change");
            if let WaitOutcome::TakenOver(status) = self.poll_until_terminal(revision, record).await? {
                warn!(revision, predecessor, %status, "own change finished by another writer while waiting");
                return Ok(WaitOutcome::TakenOver(status));
            }
        }

        // Everything in (floor, prefix_end] was terminal when we looked
        let prefix_end = lowest_open.map_or(revision - 1, |open| open - 1);
        if prefix_end > floor {
            self.coordinator().note_committed(prefix_end);
        }
        Ok(WaitOutcome::Clear)
    }

    async fn poll_until_terminal(
        &self,
        revision: Revision,
        mut record: ChangeRecord,
    ) -> Result<WaitOutcome> {
        let predecessor = record.revision;
        let timeout = self.config().heartbeat_timeout();
        let mut attempt = 0u32;
        loop {
            if record.is_stalled(self.clock().now(), timeout) {
                warn!(
                    revision,
                    predecessor,
                    status = %record.status,
                    last_activity = %record.last_activity,
                    "conflicting change stalled, recovering"
                );
                if self.recover(predecessor).await?.is_terminal() {
                    return Ok(WaitOutcome::Clear);
                }
            }

            attempt = attempt.saturating_add(1);
            self.clock().sleep(self.config().wait_backoff(attempt)).await;
            let own = self.touch(revision).await?;
            if own.is_terminal() {
                return Ok(WaitOutcome::TakenOver(own));
            }

            record = self.load_predecessor(predecessor).await?;
            record.check_lock_invariant()?;
            if record.is_terminal() {
                debug!(revision, predecessor, status = %record.status, attempts = attempt, "predecessor finished");
                return Ok(WaitOutcome::Clear);
            }
        }
    }

    async fn load_predecessor(&self, predecessor: Revision) -> Result<ChangeRecord> {
        self.records()
            .load_change(self.model_id(), predecessor)
            .await?
            .ok_or_else(|| {
                EngineError::Invariant(format!(
                    "predecessor change {}@{} does not exist",
                    self.model(),
                    predecessor
                ))
            })
    }
}
