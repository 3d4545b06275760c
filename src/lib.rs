// ============================================================================
// revlock Library
// ============================================================================
//
// Serializable multi-writer changes to a tree of models, objects and fields,
// on top of any key-value store that can compare-and-swap a single record.
//
// ============================================================================

//! # Example
//!
//! ```
//! use revlock::{Address, AtomicCommand, ChangeManager, Command, CommandOutcome, InMemoryStore};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> revlock::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let writer = ChangeManager::new(store, "inventory")?;
//!
//! let setup = Command::Transaction(vec![
//!     AtomicCommand::add(Address::model("inventory")),
//!     AtomicCommand::add(Address::object("inventory", "widget")),
//!     AtomicCommand::add_field(Address::field("inventory", "widget", "count"), 3i64),
//! ]);
//! assert_eq!(writer.execute_command(&setup, None).await?, CommandOutcome::Committed(0));
//!
//! let bump = AtomicCommand::change(Address::field("inventory", "widget", "count"), 4i64);
//! let outcome = writer.execute_command(&bump.into(), None).await?;
//! assert_eq!(outcome.code(), 1);
//! assert_eq!(writer.current_revision().await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod core;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{AtomicCommand, Command, CommandKind, Intent};
pub use config::EngineConfig;
pub use crate::core::{
    ActorId, Address, EngineError, EntityKind, FIRST_REVISION, NO_REVISION, Result, Revision,
    Value,
};
pub use storage::{
    BackingStore, EntityBody, EntityRecord, EventCodec, InMemoryStore, JsonCodec,
    MessagePackCodec,
};
pub use transaction::{
    ChangeEvent, ChangeManager, ChangeManagerBuilder, ChangeStatus, CommandOutcome, Effect,
    FAILED, LockSet, NOCHANGE, RecoveryOutcome,
};
