//! Storage layer for the cairn dataset mirror.
//!
//! Two pieces:
//!
//! - [`StorageAdapter`] - the thin key/value contract, with an in-memory
//!   and a JSON-dump disk implementation
//! - [`DatasetStore`] - domain operations layered on top: sharded leaf
//!   records, the deduplicated trail log, the contiguity probe, gap
//!   enumeration, and the payload-slice index
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cairn_store::{DatasetStore, LeafRecord, MemoryAdapter};
//!
//! let store = DatasetStore::new(Arc::new(MemoryAdapter::new()));
//! store.put_leaf_record(&LeafRecord::payload_only(0, vec![0x01])).unwrap();
//! assert_eq!(store.highest_contiguous_leaf_index_with_data().unwrap(), 0);
//! ```

mod adapter;
mod dataset;
mod disk;
mod mem;

pub use adapter::StorageAdapter;
pub use dataset::{DatasetStore, LeafRecord};
pub use disk::DiskAdapter;
pub use mem::MemoryAdapter;
