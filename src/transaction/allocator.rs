// ============================================================================
// Revision Allocation
// ============================================================================
//
// The next revision of a model is claimed by creating its change record
// with create-if-absent. Exactly one writer wins each candidate; losers move
// on to the next one. The taken-revision hint only decides where to start.
//
// ============================================================================

use super::locks::LockSet;
use super::manager::ChangeManager;
use super::state::ChangeRecord;
use crate::core::{ActorId, Result, Revision};
use tracing::debug;

impl ChangeManager {
    /// Claim a fresh revision and record `locks` on it as CREATING.
    pub(crate) async fn allocate_revision(
        &self,
        locks: &LockSet,
        actor: Option<&ActorId>,
    ) -> Result<ChangeRecord> {
        let mut candidate = self.coordinator().last_taken() + 1;
        let mut skipped = 0u32;
        loop {
            let record = ChangeRecord::creating(
                self.model_id(),
                candidate,
                locks.clone(),
                actor.cloned(),
                self.clock().now(),
            );
            if self.records().create_change(&record).await? {
                self.coordinator().note_taken(candidate);
                debug!(revision = candidate, skipped, "revision allocated");
                return Ok(record);
            }

            self.coordinator().note_taken(candidate);
            self.recover_if_stalled(candidate).await?;
            candidate += 1;
            skipped += 1;
        }
    }

    /// One look at a taken revision; stalled ones get a recovery attempt so
    /// they stop blocking everybody after us.
    async fn recover_if_stalled(&self, revision: Revision) -> Result<()> {
        let Some(existing) = self.records().load_change(self.model_id(), revision).await? else {
            return Ok(());
        };
        if existing.is_stalled(self.clock().now(), self.config().heartbeat_timeout()) {
            self.recover(revision).await?;
        }
        Ok(())
    }
}
