//! Test doubles: a simulated accumulator contract behind a mock
//! JSON-RPC transport, and an in-memory block store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use cairn_chain::abi::{encode_bytes_return, encode_index_topic, encode_leaf_appended_data};
use cairn_chain::{
    event_topic, parse_quantity, quantity, selector, ChainClient, ChainConfig, JsonRpcTransport,
};
use cairn_core::{Cid, Error, LeafEvent, Result};
use cairn_ipfs::Capabilities;
use cairn_mmr::Mmr;
use cairn_store::{DatasetStore, MemoryAdapter};
use cairn_sync::{BlockStore, Pipeline, SyncConfig};

pub const CONTRACT: &str = "0x2222222222222222222222222222222222222222";

/// A contract whose appends run through a real accumulator, so events,
/// state words, and DAG blocks are all mutually consistent.
pub struct SimChain {
    pub deploy_block: u64,
    pub previous_append_block: u64,
    pub mmr: Mmr,
    pub logs: Vec<(u64, LeafEvent)>,
    pub blocks: HashMap<Cid, Vec<u8>>,
}

impl SimChain {
    pub fn new(deploy_block: u64) -> Self {
        Self {
            deploy_block,
            previous_append_block: deploy_block,
            mmr: Mmr::new(),
            logs: Vec::new(),
            blocks: HashMap::new(),
        }
    }

    /// Append one leaf in `block`.
    pub fn append(&mut self, block: u64, payload: &[u8]) -> LeafEvent {
        let leaf_index = self.mmr.leaf_count();
        let trail = self.mmr.append(leaf_index, payload).unwrap();
        let event = LeafEvent {
            leaf_index,
            previous_append_block: self.previous_append_block,
            new_data: payload.to_vec(),
            left_inputs: trail.left_inputs.clone(),
            block_number: Some(block),
            tx_hash: None,
            removed: false,
        };
        for pair in trail.pairs {
            self.blocks.insert(pair.cid, pair.data);
        }
        self.logs.push((block, event.clone()));
        self.previous_append_block = block;
        event
    }

    pub fn root(&self) -> Cid {
        self.mmr.root().unwrap()
    }

    fn contract_state(&self) -> cairn_chain::ContractState {
        let heights = self.mmr.peak_heights();
        let mut peak_heights = [0u8; 32];
        for (slot, height) in peak_heights.iter_mut().zip(&heights) {
            *slot = *height;
        }
        cairn_chain::ContractState {
            peak_heights,
            peak_count: heights.len() as u8,
            leaf_count: self.mmr.leaf_count(),
            previous_append_block: self.previous_append_block,
            deploy_block: self.deploy_block,
        }
    }

    fn state_response(&self) -> String {
        let mut out = self.contract_state().encode().to_vec();
        let peaks = self.mmr.peaks();
        for i in 0..32 {
            match peaks.get(i) {
                Some(cid) => out.extend_from_slice(cid.hash().digest()),
                None => out.extend_from_slice(&[0u8; 32]),
            }
        }
        format!("0x{}", hex::encode(out))
    }

    fn root_response(&self) -> String {
        encode_bytes_return(&self.root().to_bytes())
    }

    fn raw_log(&self, block: u64, event: &LeafEvent) -> Value {
        json!({
            "address": CONTRACT,
            "topics": [
                event_topic("LeafAppended(uint32,uint32,bytes,bytes32[])"),
                encode_index_topic(event.leaf_index),
            ],
            "data": encode_leaf_appended_data(
                event.previous_append_block,
                &event.new_data,
                &event.left_inputs,
            ),
            "blockNumber": quantity(block),
            "transactionHash": "0x00",
            "removed": false,
        })
    }
}

/// JSON-RPC transport answering from a [`SimChain`].
pub struct MockTransport {
    pub chain: Arc<Mutex<SimChain>>,
    pub calls: Mutex<Vec<String>>,
    state_calldata: String,
    root_calldata: String,
}

impl MockTransport {
    pub fn new(chain: Arc<Mutex<SimChain>>) -> Self {
        Self {
            chain,
            calls: Mutex::new(Vec::new()),
            state_calldata: selector("getState()"),
            root_calldata: selector("getRootCID()"),
        }
    }

    pub fn calls_of(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| *m == method).count()
    }
}

#[async_trait]
impl JsonRpcTransport for MockTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.calls.lock().push(method.to_string());
        match method {
            "eth_call" => {
                let data = params[0]["data"]
                    .as_str()
                    .ok_or_else(|| Error::transport("eth_call without data"))?;
                let chain = self.chain.lock();
                if data == self.state_calldata {
                    Ok(Value::String(chain.state_response()))
                } else if data == self.root_calldata {
                    Ok(Value::String(chain.root_response()))
                } else {
                    Err(Error::transport(format!("unexpected calldata {data}")))
                }
            }
            "eth_getLogs" => {
                let filter = &params[0];
                let from = parse_quantity(filter["fromBlock"].as_str().unwrap())?;
                let to = parse_quantity(filter["toBlock"].as_str().unwrap())?;
                let topics = filter["topics"].as_array().cloned().unwrap_or_default();
                let leaf_filter = topics
                    .get(1)
                    .and_then(Value::as_str)
                    .map(|t| parse_quantity(t).unwrap());
                let chain = self.chain.lock();
                let logs: Vec<Value> = chain
                    .logs
                    .iter()
                    .filter(|(block, event)| {
                        *block >= from
                            && *block <= to
                            && leaf_filter.map_or(true, |want| event.leaf_index == want)
                    })
                    .map(|(block, event)| chain.raw_log(*block, event))
                    .collect();
                Ok(Value::Array(logs))
            }
            other => Err(Error::transport(format!("unexpected method {other}"))),
        }
    }
}

/// Block store over a shared map, recording puts.
pub struct MemoryBlockStore {
    pub blocks: Mutex<HashMap<Cid, Vec<u8>>>,
    pub puts: Mutex<Vec<Cid>>,
    pub capabilities: Capabilities,
}

impl MemoryBlockStore {
    pub fn writable() -> Self {
        Self {
            blocks: Mutex::new(HashMap::new()),
            puts: Mutex::new(Vec::new()),
            capabilities: Capabilities {
                put: true,
                pin: false,
                provide: false,
            },
        }
    }

    pub fn seeded(blocks: HashMap<Cid, Vec<u8>>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
            puts: Mutex::new(Vec::new()),
            capabilities: Capabilities {
                put: true,
                pin: false,
                provide: false,
            },
        }
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn fetch(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.blocks
            .lock()
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("block {cid}")))
    }

    async fn put(&self, cid: &Cid, data: &[u8]) -> Result<()> {
        self.blocks.lock().insert(*cid, data.to_vec());
        self.puts.lock().push(*cid);
        Ok(())
    }

    async fn provide(&self, _cid: &Cid) {}
}

/// A pipeline over a mock chain, an empty memory store, and an optional
/// block store. Returns the transport for call-count assertions.
pub fn pipeline_over(
    chain: Arc<Mutex<SimChain>>,
    blocks: Option<Arc<dyn BlockStore>>,
    sync: SyncConfig,
) -> (Arc<Pipeline>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new(chain));
    let chain_client = Arc::new(
        ChainClient::new(
            transport.clone(),
            ChainConfig::new("http://mock.invalid", CONTRACT),
        )
        .unwrap(),
    );
    let store = DatasetStore::new(Arc::new(MemoryAdapter::new()));
    let pipeline = Arc::new(Pipeline::new(chain_client, blocks, store, sync));
    (pipeline, transport)
}
