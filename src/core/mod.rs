pub mod address;
pub mod error;
pub mod types;
pub mod value;

pub use address::Address;
pub use error::{EngineError, Result};
pub use types::{ActorId, EntityKind, FIRST_REVISION, NO_REVISION, Revision};
pub use value::Value;
