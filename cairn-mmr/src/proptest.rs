//! Property-based tests for the accumulator.
//!
//! Exercises the append/inverse relationship and trail closure under
//! arbitrary payload sequences.

use std::collections::HashMap;

use proptest::prelude::*;

use cairn_core::{decode_node, Cid, Node};

use crate::{previous_root_and_peaks, Mmr};

// ============================================================================
// Strategies
// ============================================================================

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..64)
}

fn arb_payloads(max_count: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(arb_payload(), 1..max_count)
}

/// Walk a root down through a block map, collecting leaf payloads left to
/// right. Panics on dangling links, which is exactly what the closure
/// property forbids.
fn collect_leaves(root: &Cid, blocks: &HashMap<Cid, Vec<u8>>) -> Vec<Vec<u8>> {
    let data = blocks.get(root).expect("root must resolve within the trail");
    match decode_node(data).expect("trail blocks decode") {
        Node::Leaf(bytes) => vec![bytes],
        Node::Resolved(cid) => collect_leaves(&cid, blocks),
        Node::Link { left, right } => {
            let mut out = collect_leaves(&left, blocks);
            out.extend(collect_leaves(&right, blocks));
            out
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The static inverse undoes every append exactly.
    #[test]
    fn prop_inverse_roundtrip(payloads in arb_payloads(40)) {
        let mut mmr = Mmr::new();
        for (i, payload) in payloads.iter().enumerate() {
            let before_root = mmr.root().unwrap();
            let before_peaks = mmr.peaks_with_heights();

            let trail = mmr.append(i as u64, payload).unwrap();

            let (root, peaks) = previous_root_and_peaks(
                &mmr.peaks_with_heights(),
                payload,
                &trail.left_inputs,
            )
            .unwrap();
            prop_assert_eq!(root, before_root);
            prop_assert_eq!(peaks, before_peaks);
        }
    }

    /// Every CID reachable from the root resolves within the union of the
    /// emitted trails, and the leaves come back in append order.
    #[test]
    fn prop_trail_closure(payloads in arb_payloads(40)) {
        let mut mmr = Mmr::new();
        let mut blocks: HashMap<Cid, Vec<u8>> = HashMap::new();
        for (i, payload) in payloads.iter().enumerate() {
            let trail = mmr.append(i as u64, payload).unwrap();
            for pair in trail.pairs {
                blocks.insert(pair.cid, pair.data);
            }
        }
        let root = mmr.root().unwrap();
        let leaves = collect_leaves(&root, &blocks);
        prop_assert_eq!(leaves, payloads);
    }

    /// Peak count and heights always follow the bits of the leaf count.
    #[test]
    fn prop_peaks_track_leaf_count(payloads in arb_payloads(60)) {
        let mut mmr = Mmr::new();
        for (i, payload) in payloads.iter().enumerate() {
            mmr.append(i as u64, payload).unwrap();
        }
        let n = mmr.leaf_count();
        prop_assert_eq!(n, payloads.len() as u64);
        prop_assert_eq!(mmr.peaks().len(), n.count_ones() as usize);

        let heights = mmr.peak_heights();
        let covered: u64 = heights.iter().map(|h| 1u64 << h).sum();
        prop_assert_eq!(covered, n);
        prop_assert!(heights.windows(2).all(|w| w[0] > w[1]));
    }

    /// The root only depends on the payload sequence.
    #[test]
    fn prop_root_deterministic(payloads in arb_payloads(40)) {
        let mut a = Mmr::new();
        let mut b = Mmr::new();
        for (i, payload) in payloads.iter().enumerate() {
            a.append(i as u64, payload).unwrap();
            b.append(i as u64, payload).unwrap();
        }
        prop_assert_eq!(a.root().unwrap(), b.root().unwrap());
    }
}
