//! The append event observed from the authoritative contract.

use ipld_core::cid::Cid;
use serde::{Deserialize, Serialize};

/// One `LeafAppended` event, decoded into domain form.
///
/// `left_inputs[k]` is the left operand of the k-th merge triggered by
/// this append, ordered from the lowest height upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEvent {
    /// Index of the appended leaf.
    pub leaf_index: u64,
    /// Block number of the append immediately before this one.
    pub previous_append_block: u64,
    /// Raw leaf payload.
    #[serde(with = "crate::codec::hex_bytes")]
    pub new_data: Vec<u8>,
    /// Left operands of the merge cascade, lowest height first.
    #[serde(with = "crate::codec::cid_text_vec")]
    pub left_inputs: Vec<Cid>,
    /// Block the event was emitted in, when known.
    pub block_number: Option<u64>,
    /// Transaction hash, when known.
    pub tx_hash: Option<String>,
    /// Whether the log was removed by a reorg.
    #[serde(default)]
    pub removed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_node, Node};

    #[test]
    fn json_roundtrip_keeps_cids_and_payload() {
        let link = encode_node(&Node::Leaf(vec![0x11])).unwrap().cid;
        let event = LeafEvent {
            leaf_index: 7,
            previous_append_block: 1200,
            new_data: vec![0xde, 0xad],
            left_inputs: vec![link],
            block_number: Some(1234),
            tx_hash: Some("0xabc".into()),
            removed: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("dead"));
        assert!(json.contains(&link.to_string()));
        let back: LeafEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
