// ============================================================================
// Change Engine
// ============================================================================
//
// Serializable multi-writer changes over a store that is only atomic per
// record. Each command owns one change record end to end:
//
//   locks.rs        - which subtrees a change touches, and when two conflict
//   allocator.rs    - claim the next revision (create-if-absent)
//   wait.rs         - block on conflicting open predecessors
//   precondition.rs - evaluate against the lock-scoped snapshot
//   event_log.rs    - persist effects, flip to EXECUTING
//   executor.rs     - apply effects idempotently, release locks
//   recovery.rs     - roll forward or time out stalled changes
//   revision.rs     - contiguous committed prefix
//
// ============================================================================

pub mod allocator;
pub mod change;
pub mod event_log;
pub mod executor;
pub mod locks;
pub mod manager;
pub mod precondition;
pub mod recovery;
pub mod revision;
pub mod snapshot;
pub mod state;
pub mod wait;


pub use change::{ChangeEvent, Effect, EventRecord};
pub use event_log::EventCommit;
pub use locks::LockSet;
pub use manager::{ChangeManager, ChangeManagerBuilder, CommandOutcome, FAILED, ModelCoordinator, NOCHANGE};
pub use precondition::CheckOutcome;
pub use recovery::RecoveryOutcome;
pub use snapshot::SnapshotView;
pub use state::{ChangeRecord, ChangeStatus};
