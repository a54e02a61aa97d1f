//! Core accumulator implementation.
//!
//! The accumulator is a Merkle Mountain Range: a series of perfect binary
//! trees (peaks) of strictly decreasing height. Appending a leaf merges
//! equal-height peaks from the right, then the root is computed by
//! "bagging" the peaks left to right:
//!
//! ```text
//! height 1:   p0
//!            /  \          peaks = [p0, p2],  root = {L: p0, R: p2}
//! height 0: a    b   p2
//! ```
//!
//! Peak heights are not stored; they are implicit in the bits of
//! `leaf_count` (most significant bit first).

use cairn_core::{encode_node, null_cid, Cid, Error, Node, Peak, Result};

use crate::notify::{SubscriberId, TrailSubscribers};

/// One CID/bytes pair produced by an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailPair {
    /// Content address of the block.
    pub cid: Cid,
    /// dag-cbor encoded block.
    pub data: Vec<u8>,
}

/// Every block produced by a single append: the leaf, each merged link in
/// height order, then the bagging links left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trail {
    /// Index of the appended leaf.
    pub leaf_index: u64,
    /// Blocks in emission order; the leaf is always first.
    pub pairs: Vec<TrailPair>,
    /// Left operands of the merge cascade, lowest height first.
    pub left_inputs: Vec<Cid>,
    /// Root after this append.
    pub root: Cid,
}

impl Trail {
    /// CID of the appended leaf.
    pub fn leaf_cid(&self) -> Cid {
        self.pairs[0].cid
    }

    /// Number of merge links emitted (excludes the leaf and bagging links).
    pub fn merge_count(&self) -> usize {
        self.left_inputs.len()
    }
}

/// The append-only accumulator.
pub struct Mmr {
    peaks: Vec<Cid>,
    leaf_count: u64,
    subscribers: TrailSubscribers,
}

impl std::fmt::Debug for Mmr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmr")
            .field("peaks", &self.peaks)
            .field("leaf_count", &self.leaf_count)
            .finish()
    }
}

impl Default for Mmr {
    fn default() -> Self {
        Self::new()
    }
}

impl Mmr {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            peaks: Vec::new(),
            leaf_count: 0,
            subscribers: TrailSubscribers::new(),
        }
    }

    /// Restore an accumulator from a peak array and leaf count.
    pub fn from_peaks(peaks: Vec<Cid>, leaf_count: u64) -> Result<Self> {
        if leaf_count >> 32 != 0 {
            return Err(Error::invariant(format!(
                "leaf count {leaf_count} exceeds the 32-bit index space"
            )));
        }
        if peaks.len() != leaf_count.count_ones() as usize {
            return Err(Error::invariant(format!(
                "{} peaks inconsistent with leaf count {leaf_count}",
                peaks.len()
            )));
        }
        Ok(Self {
            peaks,
            leaf_count,
            subscribers: TrailSubscribers::new(),
        })
    }

    /// Number of leaves appended so far.
    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Current peaks, left to right (descending height).
    pub fn peaks(&self) -> &[Cid] {
        &self.peaks
    }

    /// Peak heights, derived from the bits of `leaf_count`.
    pub fn peak_heights(&self) -> Vec<u8> {
        peak_heights(self.leaf_count)
    }

    /// Current peaks paired with their heights.
    pub fn peaks_with_heights(&self) -> Vec<Peak> {
        self.peaks
            .iter()
            .zip(peak_heights(self.leaf_count))
            .map(|(cid, height)| Peak::new(*cid, height))
            .collect()
    }

    /// Current root: the peaks bagged left to right, or the null CID when
    /// no leaf has been appended.
    pub fn root(&self) -> Result<Cid> {
        Ok(bag_peaks(&self.peaks)?.0)
    }

    /// Current root together with the bagging links that produce it.
    pub fn root_with_trail(&self) -> Result<(Cid, Vec<TrailPair>)> {
        bag_peaks(&self.peaks)
    }

    /// Register a trail subscriber; returns a handle for unsubscribing.
    pub fn subscribe(&mut self, callback: impl FnMut(&Trail) + Send + 'static) -> SubscriberId {
        self.subscribers.subscribe(callback)
    }

    /// Remove a previously registered subscriber.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Append the leaf at `leaf_index` and return its trail.
    ///
    /// Fails with `OutOfOrder` unless `leaf_index` is exactly the next
    /// index. Subscribers are invoked after the state has advanced.
    pub fn append(&mut self, leaf_index: u64, payload: &[u8]) -> Result<Trail> {
        if leaf_index != self.leaf_count {
            return Err(Error::out_of_order(format!(
                "append of leaf {leaf_index} but the accumulator holds {} leaves",
                self.leaf_count
            )));
        }
        if self.leaf_count >> 32 != 0 {
            return Err(Error::invariant("leaf index space exhausted"));
        }

        let leaf = encode_node(&Node::Leaf(payload.to_vec()))?;
        let mut pairs = vec![TrailPair {
            cid: leaf.cid,
            data: leaf.data,
        }];
        let mut left_inputs = Vec::new();

        // Merge cascade: each set low bit of leaf_count is an existing
        // peak of that height that the new leaf merges with.
        let mut carry = leaf.cid;
        let mut remaining = self.leaf_count;
        while remaining & 1 == 1 {
            let left = self
                .peaks
                .pop()
                .ok_or_else(|| Error::invariant("merge cascade ran out of peaks"))?;
            let link = encode_node(&Node::Link { left, right: carry })?;
            left_inputs.push(left);
            carry = link.cid;
            pairs.push(TrailPair {
                cid: link.cid,
                data: link.data,
            });
            remaining >>= 1;
        }

        self.peaks.push(carry);
        self.leaf_count += 1;

        let (root, bagging) = bag_peaks(&self.peaks)?;
        pairs.extend(bagging);

        let trail = Trail {
            leaf_index,
            pairs,
            left_inputs,
            root,
        };
        self.subscribers.broadcast(&trail);
        Ok(trail)
    }
}

/// Derive peak heights (descending) from a leaf count.
pub fn peak_heights(leaf_count: u64) -> Vec<u8> {
    (0..64u8)
        .rev()
        .filter(|h| leaf_count >> h & 1 == 1)
        .collect()
}

/// Bag peaks left to right into the root, returning the link blocks
/// produced along the way.
///
/// An empty peak array bags to the null CID; a single peak is its own
/// root and produces no links.
pub fn bag_peaks(peaks: &[Cid]) -> Result<(Cid, Vec<TrailPair>)> {
    let Some((first, rest)) = peaks.split_first() else {
        return Ok((null_cid(), Vec::new()));
    };
    let mut current = *first;
    let mut pairs = Vec::with_capacity(rest.len());
    for peak in rest {
        let link = encode_node(&Node::Link {
            left: current,
            right: *peak,
        })?;
        current = link.cid;
        pairs.push(TrailPair {
            cid: link.cid,
            data: link.data,
        });
    }
    Ok((current, pairs))
}

/// Reconstruct the root and peak array the accumulator had immediately
/// before the append described by `payload` and `left_inputs`.
///
/// This is the exact inverse of the [`Mmr::append`] merge cascade when
/// `left_inputs` is in emission order (lowest height first).
pub fn previous_root_and_peaks(
    peaks_after: &[Peak],
    payload: &[u8],
    left_inputs: &[Cid],
) -> Result<(Cid, Vec<Peak>)> {
    let leaf = encode_node(&Node::Leaf(payload.to_vec()))?;
    let mut peaks = peaks_after.to_vec();

    let newest = peaks
        .pop()
        .ok_or_else(|| Error::invariant("cannot invert an append on an empty peak array"))?;

    if left_inputs.is_empty() {
        // The append created a lone height-0 peak: drop it.
        if newest.height != 0 || newest.cid != leaf.cid {
            return Err(Error::invariant(format!(
                "rightmost peak {} at height {} is not the appended leaf",
                newest.cid, newest.height
            )));
        }
    } else {
        // The append merged once per left input; the merged peak's height
        // equals the cascade length.
        if newest.height as usize != left_inputs.len() {
            return Err(Error::invariant(format!(
                "merged peak height {} inconsistent with {} left inputs",
                newest.height,
                left_inputs.len()
            )));
        }
        // Replay the cascade to confirm payload and inputs produce the
        // recorded peak.
        let mut carry = leaf.cid;
        for left in left_inputs {
            carry = encode_node(&Node::Link {
                left: *left,
                right: carry,
            })?
            .cid;
        }
        if carry != newest.cid {
            return Err(Error::invariant(format!(
                "replayed merge cascade yields {carry}, chain recorded {}",
                newest.cid
            )));
        }
        // Each left input was a peak before the append, highest first.
        for (offset, left) in left_inputs.iter().rev().enumerate() {
            let height = newest.height - 1 - offset as u8;
            peaks.push(Peak::new(*left, height));
        }
    }

    let cids: Vec<Cid> = peaks.iter().map(|p| p.cid).collect();
    let (root, _) = bag_peaks(&cids)?;
    Ok((root, peaks))
}
