// ============================================================================
// Executor
// ============================================================================
//
// Applies a decided effect list to the entity records, then flips the change
// to SUCCESS_EXECUTED and drops its locks. Every effect is guarded by the
// entity revision it expects, so replaying a list that was already (partly)
// applied leaves the same state as applying it once.
//
// ============================================================================

use super::change::Effect;
use super::manager::ChangeManager;
use super::state::ChangeStatus;
use crate::core::{Result, Revision};
use crate::storage::entity::{EntityBody, EntityRecord};
use tracing::debug;

/// Effects applied between two heartbeat refreshes.
const HEARTBEAT_EVERY: usize = 16;

impl ChangeManager {
    /// Apply `effects` for an EXECUTING change and release its locks.
    ///
    /// Returns true once the change is SUCCESS_EXECUTED, whoever finished it.
    pub(crate) async fn apply_and_release(
        &self,
        revision: Revision,
        effects: &[Effect],
    ) -> Result<bool> {
        match self.change_status(revision).await? {
            Some(ChangeStatus::Executing) => {}
            Some(ChangeStatus::SuccessExecuted) => return Ok(true),
            _ => return Ok(false),
        }

        let mut applied = 0;
        for (index, effect) in effects.iter().enumerate() {
            if index > 0 && index % HEARTBEAT_EVERY == 0 {
                let status = self.touch(revision).await?;
                if status.is_terminal() {
                    debug!(revision, %status, applied, "change finished by another writer during apply");
                    return Ok(status == ChangeStatus::SuccessExecuted);
                }
            }
            if self.apply_effect(revision, effect).await? {
                applied += 1;
            }
        }
        debug!(revision, applied, total = effects.len(), "effects applied");

        let update = self
            .records()
            .update_change(self.model_id(), revision, |record| {
                if record.status != ChangeStatus::Executing {
                    return Ok(false);
                }
                record.advance(ChangeStatus::SuccessExecuted)?;
                Ok(true)
            })
            .await?;

        let done = matches!(
            update.record().map(|record| record.status),
            Some(ChangeStatus::SuccessExecuted)
        );
        if done {
            self.advance_commit_hint(revision);
        }
        Ok(done)
    }

    /// Apply one effect if the entity is still in the state it expects.
    /// Returns false when the effect was already applied (or superseded).
    pub(crate) async fn apply_effect(&self, revision: Revision, effect: &Effect) -> Result<bool> {
        let records = self.records();
        match effect {
            Effect::Add { target, value } => {
                if records.load_entity(target).await?.is_some() {
                    return Ok(false);
                }
                records
                    .put_entity(&EntityRecord::new(target.clone(), revision, value.clone()))
                    .await?;
                Ok(true)
            }
            Effect::Change {
                target,
                old_revision,
                new_value,
                ..
            } => {
                let Some(mut entity) = records.load_entity(target).await? else {
                    return Ok(false);
                };
                if entity.revision != *old_revision {
                    return Ok(false);
                }
                entity.revision = revision;
                entity.body = EntityBody::Field {
                    value: new_value.clone(),
                };
                records.put_entity(&entity).await?;
                Ok(true)
            }
            Effect::Remove {
                target,
                old_revision,
                ..
            } => match records.load_entity(target).await? {
                Some(entity) if entity.revision == *old_revision => {
                    records.delete_entity(target).await?;
                    Ok(true)
                }
                _ => Ok(false),
            },
        }
    }

    /// Move the commit hint to `revision` when it directly follows the
    /// committed prefix.
    pub(crate) fn advance_commit_hint(&self, revision: Revision) {
        if self.coordinator().last_committed() == revision - 1 {
            self.coordinator().note_committed(revision);
        }
    }
}

