// ============================================================================
// Change Record State
// ============================================================================
//
// One ChangeRecord per (model, revision). Status only moves forward:
//
//   Creating ──> Executing ──> SuccessExecuted
//      │             │
//      │             └──(roll-forward by any writer)──> SuccessExecuted
//      ├──> SuccessNochange
//      ├──> FailedPreconditions
//      └──> FailedTimeout          (Checking behaves like Creating)
//
// Locks are present exactly while the status is non-terminal; their absence
// is itself the evidence that a revision is committed.
//
// ============================================================================

use super::locks::LockSet;
use crate::clock::elapsed_beyond;
use crate::core::{ActorId, EngineError, Result, Revision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeStatus {
    Creating,
    /// Never written by this engine; kept so records from writers that do
    /// persist a checking phase still decode.
    Checking,
    Executing,
    SuccessExecuted,
    SuccessNochange,
    FailedPreconditions,
    FailedTimeout,
}

impl ChangeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ChangeStatus::Creating | ChangeStatus::Checking | ChangeStatus::Executing
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ChangeStatus::SuccessExecuted | ChangeStatus::SuccessNochange
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ChangeStatus::FailedPreconditions | ChangeStatus::FailedTimeout
        )
    }

    /// Events are durable, so another writer can finish the job.
    pub fn can_roll_forward(&self) -> bool {
        matches!(self, ChangeStatus::Executing)
    }

    fn rank(&self) -> u8 {
        match self {
            ChangeStatus::Creating => 0,
            ChangeStatus::Checking => 1,
            ChangeStatus::Executing => 2,
            _ => 3,
        }
    }

    pub fn can_transition_to(&self, next: ChangeStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ChangeStatus::Creating => false,
            ChangeStatus::SuccessExecuted => *self == ChangeStatus::Executing,
            ChangeStatus::SuccessNochange | ChangeStatus::FailedPreconditions => {
                *self != ChangeStatus::Executing
            }
            ChangeStatus::FailedTimeout => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeStatus::Creating => write!(f, "CREATING"),
            ChangeStatus::Checking => write!(f, "CHECKING"),
            ChangeStatus::Executing => write!(f, "EXECUTING"),
            ChangeStatus::SuccessExecuted => write!(f, "SUCCESS_EXECUTED"),
            ChangeStatus::SuccessNochange => write!(f, "SUCCESS_NOCHANGE"),
            ChangeStatus::FailedPreconditions => write!(f, "FAILED_PRECONDITIONS"),
            ChangeStatus::FailedTimeout => write!(f, "FAILED_TIMEOUT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub model: String,
    pub revision: Revision,
    pub status: ChangeStatus,
    pub locks: Option<LockSet>,
    pub actor: Option<ActorId>,
    pub last_activity: DateTime<Utc>,
    pub event_count: Option<u32>,
}

impl ChangeRecord {
    pub fn creating(
        model: &str,
        revision: Revision,
        locks: LockSet,
        actor: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            model: model.to_string(),
            revision,
            status: ChangeStatus::Creating,
            locks: Some(locks),
            actor,
            last_activity: now,
            event_count: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Owner silent for longer than `timeout` while the change is still open.
    pub fn is_stalled(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.is_terminal() && elapsed_beyond(now, self.last_activity, timeout)
    }

    /// Locks to honour while waiting. A terminal record holds none.
    pub fn held_locks(&self) -> Option<&LockSet> {
        if self.is_terminal() {
            None
        } else {
            self.locks.as_ref()
        }
    }

    /// Advance the status, stripping locks on reaching a terminal state.
    pub fn advance(&mut self, next: ChangeStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::Invariant(format!(
                "change {}@{}: illegal status transition {} -> {}",
                self.model, self.revision, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.locks = None;
        }
        Ok(())
    }

    /// Terminal records must not carry locks, open ones must.
    pub fn check_lock_invariant(&self) -> Result<()> {
        match (self.is_terminal(), self.locks.is_some()) {
            (true, true) => Err(EngineError::Invariant(format!(
                "committed change {}@{} has locks set",
                self.model, self.revision
            ))),
            (false, false) => Err(EngineError::Invariant(format!(
                "open change {}@{} has no locks",
                self.model, self.revision
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Address;

    fn record() -> ChangeRecord {
        ChangeRecord::creating(
            "m",
            0,
            [Address::object("m", "o")].into_iter().collect(),
            Some(ActorId::new("a")),
            Utc::now(),
        )
    }

    #[test]
    fn test_status_path_is_monotone() {
        use ChangeStatus::*;
        assert!(Creating.can_transition_to(Executing));
        assert!(Creating.can_transition_to(SuccessNochange));
        assert!(Creating.can_transition_to(FailedPreconditions));
        assert!(Creating.can_transition_to(FailedTimeout));
        assert!(Checking.can_transition_to(Executing));
        assert!(Executing.can_transition_to(SuccessExecuted));
        assert!(Executing.can_transition_to(FailedTimeout));
        assert!(!Executing.can_transition_to(Creating));
        assert!(!Executing.can_transition_to(SuccessNochange));
        assert!(!Creating.can_transition_to(SuccessExecuted));
        assert!(!SuccessExecuted.can_transition_to(FailedTimeout));
    }

    #[test]
    fn test_advance_strips_locks_on_terminal() {
        let mut rec = record();
        rec.advance(ChangeStatus::Executing).unwrap();
        assert!(rec.locks.is_some());
        rec.advance(ChangeStatus::SuccessExecuted).unwrap();
        assert!(rec.locks.is_none());
        assert!(rec.check_lock_invariant().is_ok());
        assert!(matches!(
            rec.advance(ChangeStatus::FailedTimeout),
            Err(EngineError::Invariant(_))
        ));
    }

    #[test]
    fn test_relocked_terminal_record_is_an_invariant_violation() {
        let mut rec = record();
        rec.advance(ChangeStatus::SuccessNochange).unwrap();
        rec.locks = Some(LockSet::new());
        assert!(rec.check_lock_invariant().is_err());
    }

    #[test]
    fn test_stall_detection_ignores_terminal_records() {
        let mut rec = record();
        let later = rec.last_activity + chrono::Duration::seconds(60);
        assert!(rec.is_stalled(later, Duration::from_secs(30)));
        assert!(!rec.is_stalled(later, Duration::from_secs(90)));
        rec.advance(ChangeStatus::FailedTimeout).unwrap();
        assert!(!rec.is_stalled(later, Duration::from_secs(30)));
    }
}
