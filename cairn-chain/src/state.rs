//! The contract's packed state word.
//!
//! One 256-bit word carries the whole accumulator summary:
//!
//! ```text
//! bits   0..160   32 peak heights, 5 bits each, slot i = peak i (left to right)
//! bits 160..165   peak count
//! bits 165..197   leaf count
//! bits 197..229   block of the most recent append
//! bits 229..256   deploy block
//! ```
//!
//! Bit 0 is the least significant bit of the big-endian word.

use cairn_core::{cid_from_digest, Error, Peak, Result};

/// Decoded form of the packed state word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractState {
    /// Heights of all 32 peak slots; only the first `peak_count` matter.
    pub peak_heights: [u8; 32],
    /// Number of live peaks.
    pub peak_count: u8,
    /// Total appended leaves.
    pub leaf_count: u64,
    /// Block number of the most recent append.
    pub previous_append_block: u64,
    /// Block the contract was deployed in.
    pub deploy_block: u64,
}

fn word_bit(word: &[u8; 32], index: u32) -> u64 {
    ((word[31 - (index / 8) as usize] >> (index % 8)) & 1) as u64
}

fn word_bits(word: &[u8; 32], lo: u32, len: u32) -> u64 {
    (0..len).fold(0u64, |acc, k| acc | (word_bit(word, lo + k) << k))
}

fn set_word_bits(word: &mut [u8; 32], lo: u32, len: u32, value: u64) {
    for k in 0..len {
        if value >> k & 1 == 1 {
            let index = lo + k;
            word[31 - (index / 8) as usize] |= 1 << (index % 8);
        }
    }
}

impl ContractState {
    /// Unpack a state word, validating internal consistency.
    pub fn decode(word: &[u8; 32]) -> Result<Self> {
        let mut peak_heights = [0u8; 32];
        for (i, slot) in peak_heights.iter_mut().enumerate() {
            *slot = word_bits(word, i as u32 * 5, 5) as u8;
        }
        let peak_count = word_bits(word, 160, 5) as u8;
        let leaf_count = word_bits(word, 165, 32);
        let previous_append_block = word_bits(word, 197, 32);
        let deploy_block = word_bits(word, 229, 27);

        if peak_count as u32 != leaf_count.count_ones() {
            return Err(Error::invariant(format!(
                "state word carries {peak_count} peaks for leaf count {leaf_count}"
            )));
        }
        let live = &peak_heights[..peak_count as usize];
        if !live.windows(2).all(|w| w[0] > w[1]) {
            return Err(Error::invariant(
                "peak heights are not strictly decreasing",
            ));
        }
        let covered: u64 = live.iter().map(|h| 1u64 << h).sum();
        if covered != leaf_count {
            return Err(Error::invariant(format!(
                "peak heights cover {covered} leaves, state word says {leaf_count}"
            )));
        }

        Ok(Self {
            peak_heights,
            peak_count,
            leaf_count,
            previous_append_block,
            deploy_block,
        })
    }

    /// Pack back into a state word. Inverse of [`decode`](Self::decode);
    /// used by fixtures and the status tooling.
    pub fn encode(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        for (i, height) in self.peak_heights.iter().enumerate() {
            set_word_bits(&mut word, i as u32 * 5, 5, *height as u64);
        }
        set_word_bits(&mut word, 160, 5, self.peak_count as u64);
        set_word_bits(&mut word, 165, 32, self.leaf_count);
        set_word_bits(&mut word, 197, 32, self.previous_append_block);
        set_word_bits(&mut word, 229, 27, self.deploy_block);
        word
    }

    /// Pair the live raw peak digests with their heights.
    ///
    /// The digests come straight off the chain and are wrapped as CIDs
    /// without rehashing.
    pub fn peaks(&self, raw: &[[u8; 32]]) -> Result<Vec<Peak>> {
        if raw.len() < self.peak_count as usize {
            return Err(Error::invariant(format!(
                "peak array has {} entries, state word expects {}",
                raw.len(),
                self.peak_count
            )));
        }
        Ok(raw[..self.peak_count as usize]
            .iter()
            .zip(self.peak_heights)
            .map(|(digest, height)| Peak::new(cid_from_digest(digest), height))
            .collect())
    }
}
