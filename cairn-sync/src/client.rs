//! Public client surface over the pipeline and the dataset store.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use cairn_chain::{ChainClient, ChainConfig, HttpTransport, JsonRpcTransport, Throttled};
use cairn_core::{Error, Result};
use cairn_ipfs::{BlockClient, IpfsConfig};
use cairn_store::{DatasetStore, StorageAdapter};

use crate::pipeline::{DataSubscriberId, Pipeline, RepublishReport, SyncConfig};
use crate::source::BlockStore;

/// Everything a mirror needs to run.
#[derive(Debug, Clone)]
pub struct CairnConfig {
    /// Chain adapter configuration.
    pub chain: ChainConfig,
    /// Block service configuration; omit to run chain-only.
    pub ipfs: Option<IpfsConfig>,
    /// Pipeline tuning.
    pub sync: SyncConfig,
}

impl CairnConfig {
    /// Configuration with chain access only.
    pub fn new(chain: ChainConfig) -> Self {
        Self {
            chain,
            ipfs: None,
            sync: SyncConfig::default(),
        }
    }

    /// Attach a block service.
    pub fn with_ipfs(mut self, ipfs: IpfsConfig) -> Self {
        self.ipfs = Some(ipfs);
        self
    }

    /// Override pipeline tuning.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// A point-in-time comparison of the mirror against the chain.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Highest contiguous locally stored leaf, -1 when empty.
    pub local_contiguous: i64,
    /// Leaves committed to the in-memory accumulator.
    pub local_committed: u64,
    /// Local root CID text.
    pub local_root: String,
    /// Leaf count reported by the chain.
    pub chain_leaves: u64,
    /// Root CID text reported by the chain.
    pub chain_root: String,
    /// Whether local and chain roots agree.
    pub in_sync: bool,
}

/// The dataset mirror: materializes, verifies, and serves the sequence.
pub struct CairnClient {
    pipeline: Arc<Pipeline>,
    store: DatasetStore,
}

impl CairnClient {
    /// Open a mirror: storage first, then the block service (gateway
    /// unreachability is fatal, write API problems only downgrade), then
    /// a reachability check against the chain endpoint.
    pub async fn open(config: CairnConfig, adapter: Arc<dyn StorageAdapter>) -> Result<Self> {
        let store = DatasetStore::new(adapter);
        store.open()?;

        let transport: Arc<dyn JsonRpcTransport> = Arc::new(Throttled::new(
            Arc::new(HttpTransport::new(&config.chain.rpc_url)),
            config.chain.throttle.clone(),
        ));
        let chain = Arc::new(ChainClient::new(transport, config.chain)?);

        let blocks: Option<Arc<dyn BlockStore>> = match config.ipfs {
            Some(ipfs) => Some(Arc::new(BlockClient::connect(ipfs).await?)),
            None => None,
        };

        let (state, _) = chain
            .state()
            .await
            .map_err(|e| Error::config(format!("chain endpoint unreachable: {e}")))?;

        let pipeline = Arc::new(Pipeline::new(chain, blocks, store.clone(), config.sync));
        pipeline
            .seed_cursor(state.deploy_block.saturating_sub(1))
            .await;
        info!(
            deploy_block = state.deploy_block,
            chain_leaves = state.leaf_count,
            "mirror opened"
        );
        Ok(Self { pipeline, store })
    }

    /// Build a client over an existing pipeline. Used by tooling and
    /// tests that assemble their own collaborators.
    pub fn from_pipeline(pipeline: Arc<Pipeline>) -> Self {
        let store = pipeline.store().clone();
        Self { pipeline, store }
    }

    /// Catch up on history, rebuild the accumulator, follow the head.
    pub async fn start(&self) -> Result<()> {
        self.pipeline.sync_backwards_from_latest().await?;
        self.pipeline.rebuild_from_store().await?;
        self.pipeline.start_live_sync().await
    }

    /// Stop syncing and persist.
    pub async fn shutdown(&self) -> Result<()> {
        self.pipeline.stop_live_sync();
        self.store.persist()?;
        self.store.close()?;
        info!("mirror shut down");
        Ok(())
    }

    /// Stop only the live sync; data access keeps working.
    pub fn stop_live_sync(&self) {
        self.pipeline.stop_live_sync();
    }

    /// The pipeline backing this client.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    // ------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------

    /// Highest contiguous leaf index with a stored payload, -1 when none.
    pub fn highest_index(&self) -> Result<i64> {
        self.store.highest_contiguous_leaf_index_with_data()
    }

    /// Payload of one leaf.
    pub fn get(&self, leaf_index: u64) -> Result<Option<Vec<u8>>> {
        self.store.leaf_payload(leaf_index)
    }

    /// Payloads for the inclusive range `[from, to]`; every leaf must be
    /// present.
    pub fn range(&self, from: u64, to: u64) -> Result<Vec<Vec<u8>>> {
        if to < from {
            return Err(Error::invariant(format!("empty range {from}..{to}")));
        }
        let mut out = Vec::with_capacity((to - from + 1) as usize);
        for i in from..=to {
            out.push(
                self.store
                    .leaf_payload(i)?
                    .ok_or_else(|| Error::not_found(format!("leaf {i}")))?,
            );
        }
        Ok(out)
    }

    /// All stored leaves in index order.
    pub fn iterate(&self) -> Result<Vec<(u64, Vec<u8>)>> {
        self.store.all_leaves()
    }

    /// Inverted index over a payload slice.
    pub fn index_by_payload_slice(
        &self,
        offset: usize,
        length: usize,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        self.store.index_by_payload_slice(offset, length)
    }

    /// Raw dump of the whole key space.
    pub fn dump(&self) -> Result<Vec<(String, String)>> {
        self.store.dump()
    }

    /// Subscribe to committed leaves as `(leaf_index, payload_hex)`.
    pub fn subscribe(&self, callback: impl FnMut(u64, &str) + Send + 'static) -> DataSubscriberId {
        self.pipeline.subscribe(callback)
    }

    /// Drop a data subscription.
    pub fn unsubscribe(&self, id: DataSubscriberId) -> bool {
        self.pipeline.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Re-push the whole trail log to the block store.
    pub async fn republish(&self) -> Result<RepublishReport> {
        self.pipeline.republish().await
    }

    /// Compare the mirror against the chain.
    pub async fn status(&self) -> Result<StatusReport> {
        let chain = self.pipeline.chain();
        let (state, _) = chain.state().await?;
        let chain_root = chain.root_cid().await?;
        let local_root = self.pipeline.mmr_root().await?;
        Ok(StatusReport {
            local_contiguous: self.highest_index()?,
            local_committed: self.pipeline.mmr_leaf_count().await,
            local_root: local_root.to_string(),
            chain_leaves: state.leaf_count,
            chain_root: chain_root.to_string(),
            in_sync: local_root == chain_root,
        })
    }
}
