use crate::core::Result;
use async_trait::async_trait;

/// Backing store contract - allows pluggable key-value backends.
///
/// The only strong guarantee required is atomicity of each call on a single
/// key. There is no multi-key locking or isolation; the change engine builds
/// serializability on top of [`BackingStore::compare_and_swap`].
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Read one record
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Unconditionally write one record
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove one record; removing a missing record is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Single-record transaction: replace the record at `key` with `new`
    /// (`None` deletes) iff its current content equals `expected`
    /// (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<Vec<u8>>,
    ) -> Result<bool>;

    /// All records whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
