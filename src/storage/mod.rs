pub mod codec;
pub mod engine;
pub mod entity;
pub mod keys;
pub mod memory;
pub mod records;

pub use codec::{EventCodec, JsonCodec, MessagePackCodec};
pub use engine::BackingStore;
pub use entity::{EntityBody, EntityRecord};
pub use keys::RecordKey;
pub use memory::InMemoryStore;
pub use records::{RecordStore, RecordUpdate, SingleRecordTxn};
