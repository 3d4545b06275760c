// ============================================================================
// Current Revision
// ============================================================================

use super::manager::ChangeManager;
use crate::core::{Result, Revision};

impl ChangeManager {
    /// Highest revision below which every change is terminal.
    ///
    /// An open change blocks the counter even if later ones already
    /// committed, so readers never see a gap below the reported revision.
    /// Returns `-1` while revision 0 is still open or absent.
    pub async fn current_revision(&self) -> Result<Revision> {
        let mut current = self.coordinator().last_committed();
        loop {
            let next = current + 1;
            match self.records().load_change(self.model_id(), next).await? {
                Some(record) if record.is_terminal() => current = next,
                _ => break,
            }
        }
        self.coordinator().note_committed(current);
        Ok(current)
    }
}
