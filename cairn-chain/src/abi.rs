//! ABI wire format for the `LeafAppended` event and view-call returns.
//!
//! The event is `LeafAppended(uint32 indexed leafIndex,
//! uint32 previousAppendBlockNumber, bytes newData, bytes32[] leftInputs)`.
//! The indexed leaf index arrives as topic 1; the rest is the standard
//! head/tail dynamic encoding in the log data.

use serde::{Deserialize, Serialize};

use cairn_core::{cid_from_digest, Cid, Error, LeafEvent, Result, MAX_BLOCK_SIZE};

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Indexed topics, topic 0 first.
    pub topics: Vec<String>,
    /// ABI-encoded event data.
    pub data: String,
    /// Block number as a hex quantity.
    #[serde(default)]
    pub block_number: Option<String>,
    /// Transaction hash.
    #[serde(default)]
    pub transaction_hash: Option<String>,
    /// Set when the log was removed by a reorg.
    #[serde(default)]
    pub removed: Option<bool>,
    /// Emitting contract.
    #[serde(default)]
    pub address: Option<String>,
}

/// Strip an optional `0x` prefix.
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Parse a hex quantity ("0x1a") into a u64.
pub fn parse_quantity(s: &str) -> Result<u64> {
    u64::from_str_radix(strip_0x(s), 16)
        .map_err(|e| Error::invariant(format!("bad hex quantity {s}: {e}")))
}

/// Format a u64 as a hex quantity.
pub fn quantity(n: u64) -> String {
    format!("0x{n:x}")
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8]> {
    data.get(offset..offset + 32)
        .ok_or_else(|| Error::invariant(format!("abi data truncated at offset {offset}")))
}

/// Read a right-aligned unsigned word, requiring it to fit a u64.
fn word_u64(data: &[u8], offset: usize) -> Result<u64> {
    let word = word_at(data, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(Error::invariant(format!(
            "abi word at offset {offset} exceeds u64 range"
        )));
    }
    let mut out = [0u8; 8];
    out.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(out))
}

fn topic_u64(topic: &str) -> Result<u64> {
    let bytes = hex::decode(strip_0x(topic))?;
    if bytes.len() != 32 {
        return Err(Error::invariant(format!(
            "topic is {} bytes, expected 32",
            bytes.len()
        )));
    }
    word_u64(&bytes, 0)
}

/// Decode a raw `LeafAppended` log into its domain form.
pub fn decode_leaf_appended(log: &RawLog) -> Result<LeafEvent> {
    if log.topics.len() < 2 {
        return Err(Error::invariant(format!(
            "leaf event log has {} topics, expected 2",
            log.topics.len()
        )));
    }
    let leaf_index = topic_u64(&log.topics[1])?;

    let data = hex::decode(strip_0x(&log.data))?;
    let previous_append_block = word_u64(&data, 0)?;
    let new_data_offset = word_u64(&data, 32)? as usize;
    let inputs_offset = word_u64(&data, 64)? as usize;

    let new_data_len = word_u64(&data, new_data_offset)? as usize;
    if new_data_len > MAX_BLOCK_SIZE {
        return Err(Error::invariant(format!(
            "event payload of {new_data_len} bytes exceeds the block limit"
        )));
    }
    let new_data = data
        .get(new_data_offset + 32..new_data_offset + 32 + new_data_len)
        .ok_or_else(|| Error::invariant("event payload truncated"))?
        .to_vec();

    let inputs_len = word_u64(&data, inputs_offset)? as usize;
    let mut left_inputs: Vec<Cid> = Vec::with_capacity(inputs_len);
    for i in 0..inputs_len {
        let word = word_at(&data, inputs_offset + 32 + i * 32)?;
        let digest: [u8; 32] = word.try_into().expect("word_at returns 32 bytes");
        left_inputs.push(cid_from_digest(&digest));
    }

    let block_number = match &log.block_number {
        Some(q) => Some(parse_quantity(q)?),
        None => None,
    };

    Ok(LeafEvent {
        leaf_index,
        previous_append_block,
        new_data,
        left_inputs,
        block_number,
        tx_hash: log.transaction_hash.clone(),
        removed: log.removed.unwrap_or(false),
    })
}

/// Decode the return of a view that yields bare `bytes`: offset word,
/// length word, then the body.
pub fn decode_bytes_return(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 64 {
        return Err(Error::invariant(format!(
            "bytes return is {} bytes, expected at least 64",
            data.len()
        )));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[60..64]);
    let len = u32::from_be_bytes(len_bytes) as usize;
    data.get(64..64 + len)
        .map(|b| b.to_vec())
        .ok_or_else(|| Error::invariant("bytes return body truncated"))
}

// ----------------------------------------------------------------------
// Encoding - the inverse direction, used by fixtures and tooling.
// ----------------------------------------------------------------------

fn push_u64_word(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&[0u8; 24]);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Encode `LeafAppended` event data (the non-indexed part).
pub fn encode_leaf_appended_data(
    previous_append_block: u64,
    new_data: &[u8],
    left_inputs: &[Cid],
) -> String {
    let mut out = Vec::new();
    push_u64_word(&mut out, previous_append_block);
    // Head: two offsets relative to the start of the data.
    let new_data_offset = 96u64;
    let padded_len = new_data.len().div_ceil(32) * 32;
    let inputs_offset = new_data_offset + 32 + padded_len as u64;
    push_u64_word(&mut out, new_data_offset);
    push_u64_word(&mut out, inputs_offset);
    // Tail: newData.
    push_u64_word(&mut out, new_data.len() as u64);
    out.extend_from_slice(new_data);
    out.resize(out.len() + (padded_len - new_data.len()), 0);
    // Tail: leftInputs.
    push_u64_word(&mut out, left_inputs.len() as u64);
    for cid in left_inputs {
        out.extend_from_slice(cid.hash().digest());
    }
    format!("0x{}", hex::encode(out))
}

/// Encode a 32-byte indexed topic carrying a right-aligned integer.
pub fn encode_index_topic(value: u64) -> String {
    format!("0x{value:064x}")
}

/// Encode a bare `bytes` view return.
pub fn encode_bytes_return(body: &[u8]) -> String {
    let mut out = Vec::new();
    push_u64_word(&mut out, 32);
    push_u64_word(&mut out, body.len() as u64);
    out.extend_from_slice(body);
    let padded = body.len().div_ceil(32) * 32;
    out.resize(64 + padded, 0);
    format!("0x{}", hex::encode(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{encode_node, Node};

    fn log_for(leaf_index: u64, prev_block: u64, payload: &[u8], inputs: &[Cid]) -> RawLog {
        RawLog {
            topics: vec![
                "0x0000000000000000000000000000000000000000000000000000000000000000".into(),
                encode_index_topic(leaf_index),
            ],
            data: encode_leaf_appended_data(prev_block, payload, inputs),
            block_number: Some(quantity(999)),
            transaction_hash: Some("0xfeed".into()),
            removed: Some(false),
            address: None,
        }
    }

    #[test]
    fn event_roundtrip() {
        let a = encode_node(&Node::Leaf(vec![0x11])).unwrap().cid;
        let b = encode_node(&Node::Leaf(vec![0x22])).unwrap().cid;
        let log = log_for(5, 880, &[0xca, 0xfe, 0xba, 0xbe, 0x01], &[a, b]);

        let event = decode_leaf_appended(&log).unwrap();
        assert_eq!(event.leaf_index, 5);
        assert_eq!(event.previous_append_block, 880);
        assert_eq!(event.new_data, vec![0xca, 0xfe, 0xba, 0xbe, 0x01]);
        assert_eq!(event.left_inputs, vec![a, b]);
        assert_eq!(event.block_number, Some(999));
        assert!(!event.removed);
    }

    #[test]
    fn event_with_empty_inputs() {
        let log = log_for(0, 0, &[0x01], &[]);
        let event = decode_leaf_appended(&log).unwrap();
        assert!(event.left_inputs.is_empty());
        assert_eq!(event.leaf_index, 0);
    }

    #[test]
    fn truncated_data_is_rejected() {
        let mut log = log_for(1, 2, &[0xab; 40], &[]);
        let trimmed = &log.data[..log.data.len() - 16];
        log.data = trimmed.to_string();
        assert!(decode_leaf_appended(&log).is_err());
    }

    #[test]
    fn missing_index_topic_is_rejected() {
        let mut log = log_for(1, 2, &[0x01], &[]);
        log.topics.truncate(1);
        assert!(decode_leaf_appended(&log).is_err());
    }

    #[test]
    fn bytes_return_roundtrip() {
        let body = vec![0x01, 0x71, 0x12, 0x20, 0xaa];
        let encoded = encode_bytes_return(&body);
        let decoded = decode_bytes_return(&hex::decode(strip_0x(&encoded)).unwrap()).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert_eq!(quantity(26), "0x1a");
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn raw_log_parses_eth_get_logs_json() {
        let json = r#"{
            "address": "0x1111111111111111111111111111111111111111",
            "topics": ["0xabc0000000000000000000000000000000000000000000000000000000000000",
                       "0x0000000000000000000000000000000000000000000000000000000000000007"],
            "data": "0x",
            "blockNumber": "0x10",
            "transactionHash": "0xdead",
            "removed": false
        }"#;
        let log: RawLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.block_number.as_deref(), Some("0x10"));
        assert_eq!(topic_u64(&log.topics[1]).unwrap(), 7);
    }
}
