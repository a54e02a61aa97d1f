//! The block source seam between the pipeline and the block service.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cairn_core::{Cid, Result};
use cairn_ipfs::{BlockClient, Capabilities};

/// Where DAG blocks come from and go to.
///
/// Production uses [`BlockClient`]; tests use in-memory maps.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// What this source is allowed to do.
    fn capabilities(&self) -> Capabilities;

    /// Fetch a verified block, honoring cancellation.
    async fn fetch(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Vec<u8>>;

    /// Write a verified block.
    async fn put(&self, cid: &Cid, data: &[u8]) -> Result<()>;

    /// Announce a block. Errors are swallowed.
    async fn provide(&self, cid: &Cid);
}

#[async_trait]
impl BlockStore for BlockClient {
    fn capabilities(&self) -> Capabilities {
        BlockClient::capabilities(self)
    }

    async fn fetch(&self, cid: &Cid, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.get(cid, cancel).await
    }

    async fn put(&self, cid: &Cid, data: &[u8]) -> Result<()> {
        BlockClient::put(self, cid, data).await
    }

    async fn provide(&self, cid: &Cid) {
        BlockClient::provide(self, cid).await;
    }
}
