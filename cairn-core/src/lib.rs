//! Cairn core - fundamental types for the cairn dataset mirror.
//!
//! This crate provides the pieces every other cairn crate builds on:
//!
//! - [`error`] - the shared error taxonomy
//! - [`codec`] - dag-cbor encoding of the three DAG node shapes and
//!   CIDv1 (dag-cbor, sha2-256) helpers
//! - [`event`] - the decoded append event
//! - [`peak`] - peaks of the accumulator, paired with their heights
//!
//! # Example
//!
//! ```rust
//! use cairn_core::{encode_node, decode_node, verify_cid, Node};
//!
//! let block = encode_node(&Node::Leaf(vec![0x01, 0x02])).unwrap();
//! assert!(verify_cid(&block.data, &block.cid));
//! assert_eq!(decode_node(&block.data).unwrap(), Node::Leaf(vec![0x01, 0x02]));
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod peak;

pub use codec::{
    check_cid, cid_for, cid_from_digest, decode_node, encode_node, null_cid, verify_cid, Block,
    Node, DAG_CBOR_CODE, MAX_BLOCK_SIZE, NULL_CID_TEXT, SHA2_256_CODE,
};
pub use error::{Error, ErrorKind, Result};
pub use event::LeafEvent;
pub use peak::{total_leaves, Peak};

// The CID type used across the workspace.
pub use ipld_core::cid::Cid;
