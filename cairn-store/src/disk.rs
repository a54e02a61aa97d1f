//! Disk-backed storage adapter: a JSON-dumped map with explicit persist.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use cairn_core::{Error, Result};

use crate::adapter::StorageAdapter;

/// A [`StorageAdapter`] that keeps the whole map in memory and dumps it
/// to a single JSON file on `persist`/`close`.
///
/// Writes go to a temporary sibling file first and are renamed into
/// place, so a crash mid-persist leaves the previous dump intact.
pub struct DiskAdapter {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl DiskAdapter {
    /// Create an adapter rooted at `path`. Call [`StorageAdapter::open`]
    /// before use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Location of the JSON dump.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageAdapter for DiskAdapter {
    fn open(&self) -> Result<()> {
        if self.path.exists() {
            let raw = fs::read_to_string(&self.path)?;
            let loaded: HashMap<String, String> = serde_json::from_str(&raw)
                .map_err(|e| Error::invariant(format!("corrupt store dump {:?}: {e}", self.path)))?;
            debug!(path = ?self.path, entries = loaded.len(), "store loaded");
            *self.entries.lock() = loaded;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let dump = {
            let entries = self.entries.lock();
            serde_json::to_string(&*entries)?
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, dump)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = ?self.path, "store persisted");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = DiskAdapter::new(&path);
        store.open().unwrap();
        store.put("leaf:0:newData", "01").unwrap();
        store.put("dag:trail:maxIndex", "0").unwrap();
        store.close().unwrap();

        let reopened = DiskAdapter::new(&path);
        reopened.open().unwrap();
        assert_eq!(
            reopened.get("leaf:0:newData").unwrap().as_deref(),
            Some("01")
        );
        assert_eq!(reopened.iterate("").unwrap().len(), 2);
    }

    #[test]
    fn open_without_dump_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskAdapter::new(dir.path().join("missing.json"));
        store.open().unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn corrupt_dump_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "not json").unwrap();
        let store = DiskAdapter::new(&path);
        assert!(store.open().is_err());
    }
}
