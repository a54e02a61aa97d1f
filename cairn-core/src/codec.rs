//! dag-cbor codec for the three block shapes on the wire, plus CID helpers.
//!
//! Every block in the DAG is one of:
//! - a leaf: a bare dag-cbor byte string carrying the raw payload,
//! - a link node: the two-entry map `{ "L": <link>, "R": <link> }`,
//! - a bare link: a single tag-42 CID (decodable, never produced here).
//!
//! CIDs are always v1, codec dag-cbor (0x71), hash sha2-256 (0x12).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Multicodec code for dag-cbor.
pub const DAG_CBOR_CODE: u64 = 0x71;

/// Multihash code for sha2-256.
pub const SHA2_256_CODE: u64 = 0x12;

/// Largest block the content-addressed store accepts, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Canonical text form of the CID of dag-cbor `null`, the root of an
/// empty accumulator.
pub const NULL_CID_TEXT: &str = "bafyreifqwkmiw256ojf2zws6tzjeonw6bpd5vza4i22ccpcq4hjv2ts7cm";

/// A decoded DAG node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Raw leaf payload.
    Leaf(Vec<u8>),
    /// Interior node joining two children.
    Link {
        /// Left child.
        left: Cid,
        /// Right child.
        right: Cid,
    },
    /// A block that is nothing but a link to another block. Gateways may
    /// serve these; the accumulator never emits them.
    Resolved(Cid),
}

impl Node {
    fn to_ipld(&self) -> Ipld {
        match self {
            Node::Leaf(bytes) => Ipld::Bytes(bytes.clone()),
            Node::Link { left, right } => {
                let mut map = BTreeMap::new();
                map.insert("L".to_string(), Ipld::Link(*left));
                map.insert("R".to_string(), Ipld::Link(*right));
                Ipld::Map(map)
            }
            Node::Resolved(cid) => Ipld::Link(*cid),
        }
    }

    fn from_ipld(ipld: Ipld) -> Result<Node> {
        match ipld {
            Ipld::Bytes(bytes) => Ok(Node::Leaf(bytes)),
            Ipld::Link(cid) => Ok(Node::Resolved(cid)),
            Ipld::Map(map) => {
                if map.len() != 2 {
                    return Err(Error::invariant(format!(
                        "link node must have exactly keys L and R, got {} entries",
                        map.len()
                    )));
                }
                match (map.get("L"), map.get("R")) {
                    (Some(Ipld::Link(left)), Some(Ipld::Link(right))) => Ok(Node::Link {
                        left: *left,
                        right: *right,
                    }),
                    _ => Err(Error::invariant("link node entries must be CID links")),
                }
            }
            other => Err(Error::invariant(format!(
                "unsupported node shape: {}",
                ipld_kind(&other)
            ))),
        }
    }
}

fn ipld_kind(ipld: &Ipld) -> &'static str {
    match ipld {
        Ipld::Null => "null",
        Ipld::Bool(_) => "bool",
        Ipld::Integer(_) => "integer",
        Ipld::Float(_) => "float",
        Ipld::String(_) => "string",
        Ipld::Bytes(_) => "bytes",
        Ipld::List(_) => "list",
        Ipld::Map(_) => "map",
        Ipld::Link(_) => "link",
    }
}

/// An encoded block together with its content address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// CID over `data`.
    pub cid: Cid,
    /// dag-cbor bytes.
    pub data: Vec<u8>,
}

/// Compute the CIDv1 (dag-cbor, sha2-256) of a byte slice.
pub fn cid_for(data: &[u8]) -> Cid {
    let digest: [u8; 32] = Sha256::digest(data).into();
    cid_from_digest(&digest)
}

/// Wrap a raw 32-byte sha2-256 digest as a CID without rehashing.
///
/// Used for digests read straight off the chain (peak arrays, event
/// left inputs), which are already the digest of the referenced block.
pub fn cid_from_digest(digest: &[u8; 32]) -> Cid {
    let mh = Multihash::wrap(SHA2_256_CODE, digest)
        .expect("a 32-byte digest always fits a 64-byte multihash");
    Cid::new_v1(DAG_CBOR_CODE, mh)
}

/// Encode a node to dag-cbor and compute its CID.
///
/// Deterministic: the same node always yields the same bytes and CID.
pub fn encode_node(node: &Node) -> Result<Block> {
    if let Node::Leaf(payload) = node {
        if payload.len() > MAX_BLOCK_SIZE {
            return Err(Error::invariant(format!(
                "leaf payload of {} bytes exceeds the {} byte block limit",
                payload.len(),
                MAX_BLOCK_SIZE
            )));
        }
    }
    let data = serde_ipld_dagcbor::to_vec(&node.to_ipld())
        .map_err(|e| Error::invariant(format!("dag-cbor encode: {e}")))?;
    let cid = cid_for(&data);
    Ok(Block { cid, data })
}

/// Decode a dag-cbor block into one of the known node shapes.
pub fn decode_node(data: &[u8]) -> Result<Node> {
    let ipld: Ipld = serde_ipld_dagcbor::from_slice(data)
        .map_err(|e| Error::invariant(format!("dag-cbor decode: {e}")))?;
    Node::from_ipld(ipld)
}

/// Check whether `data` rehashes to `expected`.
pub fn verify_cid(data: &[u8], expected: &Cid) -> bool {
    cid_for(data) == *expected
}

/// Like [`verify_cid`], but failing with a `CidMismatch` error.
pub fn check_cid(data: &[u8], expected: &Cid) -> Result<()> {
    let computed = cid_for(data);
    if computed == *expected {
        Ok(())
    } else {
        Err(Error::CidMismatch {
            expected: expected.to_string(),
            computed: computed.to_string(),
        })
    }
}

/// CID of dag-cbor `null`: the root of an accumulator with no leaves.
pub fn null_cid() -> Cid {
    static NULL: OnceLock<Cid> = OnceLock::new();
    // 0xf6 is the dag-cbor encoding of null.
    *NULL.get_or_init(|| cid_for(&[0xf6]))
}

/// Serde adapters for CIDs stored as their canonical text form.
pub mod cid_text {
    use ipld_core::cid::Cid;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a CID as its base32 text form.
    pub fn serialize<S: Serializer>(cid: &Cid, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&cid.to_string())
    }

    /// Deserialize a CID from its text form.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Cid, D::Error> {
        let text = String::deserialize(d)?;
        Cid::try_from(text.as_str()).map_err(serde::de::Error::custom)
    }
}

/// Serde adapters for CID sequences stored as text forms.
pub mod cid_text_vec {
    use ipld_core::cid::Cid;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a CID list as text forms.
    pub fn serialize<S: Serializer>(cids: &[Cid], s: S) -> Result<S::Ok, S::Error> {
        let texts: Vec<String> = cids.iter().map(|c| c.to_string()).collect();
        serde::Serialize::serialize(&texts, s)
    }

    /// Deserialize a CID list from text forms.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Cid>, D::Error> {
        let texts = Vec::<String>::deserialize(d)?;
        texts
            .into_iter()
            .map(|t| Cid::try_from(t.as_str()).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde adapters for byte payloads stored as hex.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as lowercase hex.
    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    /// Deserialize bytes from hex, tolerating a 0x prefix.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}
