//! The key/value contract every storage backend satisfies.

use cairn_core::Result;

/// A flat string-keyed store.
///
/// Adapters hold their own interior locking; every method takes `&self`
/// and the adapter is the serialization point for persistence.
pub trait StorageAdapter: Send + Sync {
    /// Prepare the backend for use (load from disk, open handles).
    fn open(&self) -> Result<()>;

    /// Release the backend, persisting if applicable.
    fn close(&self) -> Result<()>;

    /// Force buffered state out to durable storage.
    fn persist(&self) -> Result<()>;

    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value.
    fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, sorted by key.
    fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}
