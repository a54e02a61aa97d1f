//! View calls and log queries against the accumulator contract.

use std::sync::Arc;

use serde_json::json;
use sha3::{Digest, Keccak256};
use tracing::debug;

use cairn_core::{Cid, Error, LeafEvent, Result};

use crate::abi::{
    decode_bytes_return, decode_leaf_appended, encode_index_topic, quantity, strip_0x, RawLog,
};
use crate::state::ContractState;
use crate::transport::{JsonRpcTransport, ThrottleConfig};

/// Keccak-256 selector (first four bytes) for a function signature.
pub fn selector(signature: &str) -> String {
    let digest = Keccak256::digest(signature.as_bytes());
    format!("0x{}", hex::encode(&digest[..4]))
}

/// Keccak-256 topic for an event signature.
pub fn event_topic(signature: &str) -> String {
    let digest = Keccak256::digest(signature.as_bytes());
    format!("0x{}", hex::encode(digest))
}

/// Chain adapter configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Optional WebSocket endpoint for the newHeads push channel.
    pub ws_url: Option<String>,
    /// Accumulator contract address (0x-prefixed).
    pub contract: String,
    /// Event signature; overridable for contracts that rename it.
    pub event_signature: String,
    /// Literal topic 0 override; wins over `event_signature`.
    pub event_topic_override: Option<String>,
    /// Root view signature.
    pub root_signature: String,
    /// Literal calldata override for the root view.
    pub root_calldata_override: Option<String>,
    /// State view signature.
    pub state_signature: String,
    /// Literal calldata override for the state view.
    pub state_calldata_override: Option<String>,
    /// Throttle and retry policy for all RPC traffic.
    pub throttle: ThrottleConfig,
}

impl ChainConfig {
    /// Create a configuration for a contract at `contract` behind `rpc_url`.
    pub fn new(rpc_url: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ws_url: None,
            contract: contract.into(),
            event_signature: "LeafAppended(uint32,uint32,bytes,bytes32[])".into(),
            event_topic_override: None,
            root_signature: "getRootCID()".into(),
            root_calldata_override: None,
            state_signature: "getState()".into(),
            state_calldata_override: None,
            throttle: ThrottleConfig::default(),
        }
    }

    /// Set the WebSocket endpoint.
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Override topic 0 of the append event.
    pub fn with_event_topic(mut self, topic: impl Into<String>) -> Self {
        self.event_topic_override = Some(topic.into());
        self
    }

    /// Override the calldata of the root view (for dispatcher contracts).
    pub fn with_root_calldata(mut self, calldata: impl Into<String>) -> Self {
        self.root_calldata_override = Some(calldata.into());
        self
    }

    /// Override the calldata of the state view.
    pub fn with_state_calldata(mut self, calldata: impl Into<String>) -> Self {
        self.state_calldata_override = Some(calldata.into());
        self
    }

    /// Set the throttle policy.
    pub fn with_throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    /// Validate endpoint and address shapes.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(Error::config("rpc_url is required"));
        }
        let address = strip_0x(&self.contract);
        if address.len() != 40 || hex::decode(address).is_err() {
            return Err(Error::config(format!(
                "contract address {} is not a 20-byte hex address",
                self.contract
            )));
        }
        Ok(())
    }
}

/// Client for the accumulator contract.
pub struct ChainClient {
    transport: Arc<dyn JsonRpcTransport>,
    config: ChainConfig,
    event_topic: String,
    root_calldata: String,
    state_calldata: String,
}

impl ChainClient {
    /// Create a client over an already-throttled transport.
    pub fn new(transport: Arc<dyn JsonRpcTransport>, config: ChainConfig) -> Result<Self> {
        config.validate()?;
        let topic = config
            .event_topic_override
            .clone()
            .unwrap_or_else(|| event_topic(&config.event_signature));
        let root_calldata = config
            .root_calldata_override
            .clone()
            .unwrap_or_else(|| selector(&config.root_signature));
        let state_calldata = config
            .state_calldata_override
            .clone()
            .unwrap_or_else(|| selector(&config.state_signature));
        Ok(Self {
            transport,
            config,
            event_topic: topic,
            root_calldata,
            state_calldata,
        })
    }

    /// Topic 0 used for log filters.
    pub fn topic0(&self) -> &str {
        &self.event_topic
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    async fn call(&self, calldata: &str) -> Result<Vec<u8>> {
        let params = json!([{"to": self.config.contract, "data": calldata}, "latest"]);
        let value = self.transport.request("eth_call", params).await?;
        let text = value
            .as_str()
            .ok_or_else(|| Error::transport("eth_call returned a non-string result"))?;
        Ok(hex::decode(strip_0x(text))?)
    }

    /// The contract's current root CID.
    pub async fn root_cid(&self) -> Result<Cid> {
        let out = self.call(&self.root_calldata).await?;
        let body = decode_bytes_return(&out)?;
        Cid::try_from(body.as_slice())
            .map_err(|e| Error::invariant(format!("contract root is not a valid cid: {e}")))
    }

    /// The packed state word and raw 32-slot peak array.
    pub async fn state(&self) -> Result<(ContractState, Vec<[u8; 32]>)> {
        let out = self.call(&self.state_calldata).await?;
        if out.len() < 33 * 32 {
            return Err(Error::invariant(format!(
                "state view returned {} bytes, expected {}",
                out.len(),
                33 * 32
            )));
        }
        let word: [u8; 32] = out[..32].try_into().expect("checked length");
        let state = ContractState::decode(&word)?;
        let peaks = (0..32)
            .map(|i| {
                out[32 + i * 32..64 + i * 32]
                    .try_into()
                    .expect("checked length")
            })
            .collect();
        Ok((state, peaks))
    }

    /// All append events in an inclusive block range.
    pub async fn leaf_appended_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<LeafEvent>> {
        let params = json!([{
            "address": self.config.contract,
            "fromBlock": quantity(from_block),
            "toBlock": quantity(to_block),
            "topics": [self.event_topic],
        }]);
        let value = self.transport.request("eth_getLogs", params).await?;
        let logs: Vec<RawLog> = serde_json::from_value(value)
            .map_err(|e| Error::transport(format!("eth_getLogs returned malformed logs: {e}")))?;
        debug!(from_block, to_block, count = logs.len(), "fetched append logs");
        logs.iter()
            .filter(|log| log.removed != Some(true))
            .map(decode_leaf_appended)
            .collect()
    }

    /// The single append event for `leaf_index`, emitted in `block`.
    pub async fn leaf_event_at(&self, leaf_index: u64, block: u64) -> Result<LeafEvent> {
        let params = json!([{
            "address": self.config.contract,
            "fromBlock": quantity(block),
            "toBlock": quantity(block),
            "topics": [self.event_topic, encode_index_topic(leaf_index)],
        }]);
        let value = self.transport.request("eth_getLogs", params).await?;
        let logs: Vec<RawLog> = serde_json::from_value(value)
            .map_err(|e| Error::transport(format!("eth_getLogs returned malformed logs: {e}")))?;
        logs.iter()
            .filter(|log| log.removed != Some(true))
            .map(decode_leaf_appended)
            .next()
            .transpose()?
            .ok_or_else(|| {
                Error::not_found(format!("no append event for leaf {leaf_index} in block {block}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matches_known_vector() {
        // The canonical ERC-20 transfer selector.
        assert_eq!(selector("transfer(address,uint256)"), "0xa9059cbb");
    }

    #[test]
    fn event_topic_is_full_width() {
        let topic = event_topic("LeafAppended(uint32,uint32,bytes,bytes32[])");
        assert_eq!(topic.len(), 66);
        assert!(topic.starts_with("0x"));
    }

    #[test]
    fn config_validation() {
        let good = ChainConfig::new(
            "http://localhost:8545",
            "0x1111111111111111111111111111111111111111",
        );
        assert!(good.validate().is_ok());

        let bad = ChainConfig::new("http://localhost:8545", "0x1234");
        assert!(bad.validate().is_err());

        let empty = ChainConfig::new("", "0x1111111111111111111111111111111111111111");
        assert!(empty.validate().is_err());
    }

    #[test]
    fn overrides_win_over_signatures() {
        let config = ChainConfig::new(
            "http://localhost:8545",
            "0x1111111111111111111111111111111111111111",
        )
        .with_event_topic("0xdeadbeef")
        .with_root_calldata("0x01020304")
        .with_state_calldata("0x0a0b0c0d");
        let transport: Arc<dyn JsonRpcTransport> = Arc::new(crate::transport::HttpTransport::new(
            "http://localhost:8545",
        ));
        let client = ChainClient::new(transport, config).unwrap();
        assert_eq!(client.topic0(), "0xdeadbeef");
        assert_eq!(client.root_calldata, "0x01020304");
        assert_eq!(client.state_calldata, "0x0a0b0c0d");
    }
}
