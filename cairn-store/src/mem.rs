//! In-memory storage adapter (tests and ephemeral runs).

use std::collections::HashMap;

use parking_lot::Mutex;

use cairn_core::Result;

use crate::adapter::StorageAdapter;

/// A [`StorageAdapter`] backed by a plain map. Nothing survives the
/// process.
#[derive(Default)]
pub struct MemoryAdapter {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let entries = self.entries.lock();
        let mut out: Vec<(String, String)> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
