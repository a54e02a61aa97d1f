//! Dataset-level operations over a raw storage adapter.
//!
//! Leaf records are sharded across per-field keys, the DAG trail is an
//! append-only log deduplicated by CID, and a handful of probes answer
//! the questions the reconciliation pipeline keeps asking: how far is
//! local data contiguous, and where are the holes.
//!
//! Reserved key space:
//!
//! ```text
//! leaf:{i}:newData            hex payload; presence == "leaf is in the DB"
//! leaf:{i}:event              JSON append event
//! leaf:{i}:blockNumber        decimal
//! leaf:{i}:rootCid            root before this append, CID text
//! leaf:{i}:peaksWithHeights   JSON [{cid, height}] before this append
//! dag:trail:index:{n}         JSON {cid, data}
//! dag:trail:maxIndex          decimal
//! cid:{cid}                   dedup sentinel, always "1"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use cairn_core::{check_cid, Cid, Error, LeafEvent, Peak, Result};

use crate::adapter::StorageAdapter;

const FIELD_NEW_DATA: &str = "newData";
const FIELD_EVENT: &str = "event";
const FIELD_BLOCK_NUMBER: &str = "blockNumber";
const FIELD_ROOT_CID: &str = "rootCid";
const FIELD_PEAKS: &str = "peaksWithHeights";

const LEAF_PREFIX: &str = "leaf:";
const TRAIL_MAX_INDEX_KEY: &str = "dag:trail:maxIndex";

fn leaf_key(index: u64, field: &str) -> String {
    format!("leaf:{index}:{field}")
}

fn trail_key(index: u64) -> String {
    format!("dag:trail:index:{index}")
}

fn cid_key(cid: &Cid) -> String {
    format!("cid:{cid}")
}

/// Everything known locally about one leaf.
///
/// `new_data` is always present; the other fields depend on how the leaf
/// was learned (chain event, backward sweep, or DAG resolve).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRecord {
    /// Index of the leaf.
    pub leaf_index: u64,
    /// Raw payload.
    pub new_data: Vec<u8>,
    /// The append event, when observed from the chain.
    pub event: Option<LeafEvent>,
    /// Block of the append, when known.
    pub block_number: Option<u64>,
    /// Root the accumulator had just before this append.
    pub root_cid_before_append: Option<Cid>,
    /// Peaks the accumulator had just before this append.
    pub peaks_before_append: Option<Vec<Peak>>,
}

impl LeafRecord {
    /// A record holding only the payload.
    pub fn payload_only(leaf_index: u64, new_data: Vec<u8>) -> Self {
        Self {
            leaf_index,
            new_data,
            event: None,
            block_number: None,
            root_cid_before_append: None,
            peaks_before_append: None,
        }
    }

    /// A record derived from a chain event.
    pub fn from_event(event: &LeafEvent) -> Self {
        Self {
            leaf_index: event.leaf_index,
            new_data: event.new_data.clone(),
            block_number: event.block_number,
            event: Some(event.clone()),
            root_cid_before_append: None,
            peaks_before_append: None,
        }
    }

    /// Attach the pre-append accumulator state.
    pub fn with_prestate(mut self, root: Cid, peaks: Vec<Peak>) -> Self {
        self.root_cid_before_append = Some(root);
        self.peaks_before_append = Some(peaks);
        self
    }
}

#[derive(Serialize, Deserialize)]
struct StoredTrailPair {
    cid: String,
    #[serde(with = "cairn_core::codec::hex_bytes")]
    data: Vec<u8>,
}

/// Domain operations over a [`StorageAdapter`].
#[derive(Clone)]
pub struct DatasetStore {
    adapter: Arc<dyn StorageAdapter>,
}

impl DatasetStore {
    /// Wrap an adapter.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Open the underlying adapter.
    pub fn open(&self) -> Result<()> {
        self.adapter.open()
    }

    /// Close the underlying adapter.
    pub fn close(&self) -> Result<()> {
        self.adapter.close()
    }

    /// Persist the underlying adapter.
    pub fn persist(&self) -> Result<()> {
        self.adapter.persist()
    }

    // ------------------------------------------------------------------
    // Leaf records
    // ------------------------------------------------------------------

    /// Store a leaf record. Records are write-once: if the leaf is
    /// already present this is a no-op and returns `false`.
    pub fn put_leaf_record(&self, record: &LeafRecord) -> Result<bool> {
        let data_key = leaf_key(record.leaf_index, FIELD_NEW_DATA);
        if self.adapter.get(&data_key)?.is_some() {
            return Ok(false);
        }
        self.adapter.put(&data_key, &hex::encode(&record.new_data))?;
        if let Some(event) = &record.event {
            self.adapter.put(
                &leaf_key(record.leaf_index, FIELD_EVENT),
                &serde_json::to_string(event)?,
            )?;
        }
        if let Some(block) = record.block_number {
            self.adapter.put(
                &leaf_key(record.leaf_index, FIELD_BLOCK_NUMBER),
                &block.to_string(),
            )?;
        }
        if let Some(root) = &record.root_cid_before_append {
            self.adapter
                .put(&leaf_key(record.leaf_index, FIELD_ROOT_CID), &root.to_string())?;
        }
        if let Some(peaks) = &record.peaks_before_append {
            self.adapter.put(
                &leaf_key(record.leaf_index, FIELD_PEAKS),
                &serde_json::to_string(peaks)?,
            )?;
        }
        debug!(leaf = record.leaf_index, "leaf record stored");
        Ok(true)
    }

    /// Backfill the pre-append state fields of an existing record.
    /// Fields that are already present are left untouched.
    pub fn fill_leaf_prestate(&self, leaf_index: u64, root: &Cid, peaks: &[Peak]) -> Result<()> {
        if self.adapter.get(&leaf_key(leaf_index, FIELD_NEW_DATA))?.is_none() {
            return Err(Error::not_found(format!(
                "no record for leaf {leaf_index} to backfill"
            )));
        }
        let root_key = leaf_key(leaf_index, FIELD_ROOT_CID);
        if self.adapter.get(&root_key)?.is_none() {
            self.adapter.put(&root_key, &root.to_string())?;
        }
        let peaks_key = leaf_key(leaf_index, FIELD_PEAKS);
        if self.adapter.get(&peaks_key)?.is_none() {
            self.adapter.put(&peaks_key, &serde_json::to_string(peaks)?)?;
        }
        Ok(())
    }

    /// Whether the payload for `leaf_index` is stored.
    pub fn has_leaf(&self, leaf_index: u64) -> Result<bool> {
        Ok(self
            .adapter
            .get(&leaf_key(leaf_index, FIELD_NEW_DATA))?
            .is_some())
    }

    /// Raw payload of a leaf.
    pub fn leaf_payload(&self, leaf_index: u64) -> Result<Option<Vec<u8>>> {
        match self.adapter.get(&leaf_key(leaf_index, FIELD_NEW_DATA))? {
            Some(hex_data) => Ok(Some(hex::decode(hex_data.trim_start_matches("0x"))?)),
            None => Ok(None),
        }
    }

    /// The full record for a leaf, if its payload is stored.
    pub fn leaf_record(&self, leaf_index: u64) -> Result<Option<LeafRecord>> {
        let Some(new_data) = self.leaf_payload(leaf_index)? else {
            return Ok(None);
        };
        let event = match self.adapter.get(&leaf_key(leaf_index, FIELD_EVENT))? {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        let block_number = match self.adapter.get(&leaf_key(leaf_index, FIELD_BLOCK_NUMBER))? {
            Some(s) => Some(
                s.parse::<u64>()
                    .map_err(|e| Error::invariant(format!("bad block number for leaf {leaf_index}: {e}")))?,
            ),
            None => None,
        };
        let root_cid_before_append = match self.adapter.get(&leaf_key(leaf_index, FIELD_ROOT_CID))? {
            Some(text) => Some(
                Cid::try_from(text.as_str())
                    .map_err(|e| Error::invariant(format!("bad root cid for leaf {leaf_index}: {e}")))?,
            ),
            None => None,
        };
        let peaks_before_append = match self.adapter.get(&leaf_key(leaf_index, FIELD_PEAKS))? {
            Some(json) => Some(serde_json::from_str::<Vec<Peak>>(&json)?),
            None => None,
        };
        Ok(Some(LeafRecord {
            leaf_index,
            new_data,
            event,
            block_number,
            root_cid_before_append,
            peaks_before_append,
        }))
    }

    // ------------------------------------------------------------------
    // Contiguity and gaps
    // ------------------------------------------------------------------

    /// Largest N such that payloads for leaves 0..=N are all stored, or
    /// -1 when leaf 0 is absent.
    pub fn highest_contiguous_leaf_index_with_data(&self) -> Result<i64> {
        let mut n: i64 = -1;
        while self
            .adapter
            .get(&leaf_key((n + 1) as u64, FIELD_NEW_DATA))?
            .is_some()
        {
            n += 1;
        }
        Ok(n)
    }

    /// Indices in the set of locally-known leaves.
    fn stored_leaf_indices(&self) -> Result<BTreeSet<u64>> {
        let mut indices = BTreeSet::new();
        for (key, _) in self.adapter.iterate(LEAF_PREFIX)? {
            let Some(rest) = key.strip_prefix(LEAF_PREFIX) else {
                continue;
            };
            let Some((index, field)) = rest.split_once(':') else {
                continue;
            };
            if field != FIELD_NEW_DATA {
                continue;
            }
            let index: u64 = index
                .parse()
                .map_err(|e| Error::invariant(format!("bad leaf key {key}: {e}")))?;
            indices.insert(index);
        }
        Ok(indices)
    }

    /// Sorted indices in `[0, max_stored]` whose payload is missing.
    /// Empty when no leaf is stored at all.
    pub fn missing_leaf_indices(&self) -> Result<Vec<u64>> {
        let stored = self.stored_leaf_indices()?;
        let Some(&max) = stored.iter().next_back() else {
            return Ok(Vec::new());
        };
        Ok((0..=max).filter(|i| !stored.contains(i)).collect())
    }

    // ------------------------------------------------------------------
    // Trail log
    // ------------------------------------------------------------------

    /// Append a CID/bytes pair to the trail log.
    ///
    /// Verifies the CID, silently skips pairs already logged (by CID),
    /// and returns whether the pair was newly appended.
    pub fn append_trail_pair(&self, cid: &Cid, data: &[u8]) -> Result<bool> {
        check_cid(data, cid)?;
        let sentinel = cid_key(cid);
        if self.adapter.get(&sentinel)?.is_some() {
            return Ok(false);
        }
        let next = match self.trail_max_index()? {
            Some(max) => max + 1,
            None => 0,
        };
        let stored = StoredTrailPair {
            cid: cid.to_string(),
            data: data.to_vec(),
        };
        self.adapter
            .put(&trail_key(next), &serde_json::to_string(&stored)?)?;
        self.adapter.put(TRAIL_MAX_INDEX_KEY, &next.to_string())?;
        self.adapter.put(&sentinel, "1")?;
        Ok(true)
    }

    /// Highest trail index written, or `None` for an empty log.
    pub fn trail_max_index(&self) -> Result<Option<u64>> {
        match self.adapter.get(TRAIL_MAX_INDEX_KEY)? {
            Some(s) => Ok(Some(s.parse::<u64>().map_err(|e| {
                Error::invariant(format!("bad trail max index: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Read one trail pair.
    pub fn trail_pair(&self, index: u64) -> Result<Option<(Cid, Vec<u8>)>> {
        match self.adapter.get(&trail_key(index))? {
            Some(json) => {
                let stored: StoredTrailPair = serde_json::from_str(&json)?;
                let cid = Cid::try_from(stored.cid.as_str())
                    .map_err(|e| Error::invariant(format!("bad trail cid at {index}: {e}")))?;
                Ok(Some((cid, stored.data)))
            }
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Inverted index over a payload slice: maps the hex form of
    /// `payload[offset..offset + length]` to the storage keys of leaves
    /// carrying it. Leaves shorter than the slice are skipped.
    pub fn index_by_payload_slice(
        &self,
        offset: usize,
        length: usize,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut hits: Vec<(u64, String, String)> = Vec::new();
        for i in self.stored_leaf_indices()? {
            let Some(payload) = self.leaf_payload(i)? else {
                continue;
            };
            if payload.len() < offset + length {
                continue;
            }
            let slice = hex::encode(&payload[offset..offset + length]);
            hits.push((i, slice, leaf_key(i, FIELD_NEW_DATA)));
        }
        hits.sort_by_key(|(i, _, _)| *i);
        for (_, slice, key) in hits {
            index.entry(slice).or_default().push(key);
        }
        Ok(index)
    }

    /// Payloads of every stored leaf, in index order.
    pub fn all_leaves(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        let mut out = Vec::new();
        for i in self.stored_leaf_indices()? {
            if let Some(payload) = self.leaf_payload(i)? {
                out.push((i, payload));
            }
        }
        Ok(out)
    }

    /// Every stored key/value pair, sorted by key.
    pub fn dump(&self) -> Result<Vec<(String, String)>> {
        self.adapter.iterate("")
    }
}
