//! A peak: the root of one perfect subtree in the accumulator.

use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};

/// One peak, paired with the height of its subtree.
///
/// Heights are strictly decreasing along a peak array, left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peak {
    /// Root CID of the subtree.
    #[serde(with = "crate::codec::cid_text")]
    pub cid: Cid,
    /// Height of the subtree; a lone leaf has height 0.
    pub height: u8,
}

impl Peak {
    /// Create a peak.
    pub fn new(cid: Cid, height: u8) -> Self {
        Self { cid, height }
    }

    /// Number of leaves under this peak.
    pub fn leaf_count(&self) -> u64 {
        1u64 << self.height
    }
}

/// Total leaves under a peak array.
pub fn total_leaves(peaks: &[Peak]) -> u64 {
    peaks.iter().map(Peak::leaf_count).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::null_cid;

    #[test]
    fn leaf_counts() {
        assert_eq!(Peak::new(null_cid(), 0).leaf_count(), 1);
        assert_eq!(Peak::new(null_cid(), 5).leaf_count(), 32);
        let peaks = vec![Peak::new(null_cid(), 2), Peak::new(null_cid(), 0)];
        assert_eq!(total_leaves(&peaks), 5);
    }

    #[test]
    fn serializes_with_text_cid() {
        let peak = Peak::new(null_cid(), 3);
        let json = serde_json::to_string(&peak).unwrap();
        assert!(json.contains(&null_cid().to_string()));
        let back: Peak = serde_json::from_str(&json).unwrap();
        assert_eq!(back, peak);
    }
}
