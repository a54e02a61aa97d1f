//! Depth-first resolution of a root CID into its leaf byte sequence.

use tokio_util::sync::CancellationToken;

use cairn_core::{decode_node, Cid, Error, Node, Result};

use crate::source::BlockStore;

/// Resolve the DAG under `root` into its leaves, left to right.
///
/// Every fetched block is verified against its CID by the source. Any
/// missing block, fetch failure, or unknown shape fails the whole call;
/// cancellation is honored before every fetch and yields `Cancelled`.
pub async fn resolve_tree(
    root: &Cid,
    source: &dyn BlockStore,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<u8>>> {
    let mut leaves = Vec::new();
    // Explicit stack, right child pushed first so the left one resolves
    // first and leaves come out in order.
    let mut pending = vec![*root];
    while let Some(cid) = pending.pop() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let data = source.fetch(&cid, cancel).await?;
        match decode_node(&data)? {
            Node::Leaf(bytes) => leaves.push(bytes),
            Node::Resolved(target) => pending.push(target),
            Node::Link { left, right } => {
                pending.push(right);
                pending.push(left);
            }
        }
    }
    Ok(leaves)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use cairn_core::{encode_node, ErrorKind};
    use cairn_ipfs::Capabilities;
    use cairn_mmr::Mmr;

    use super::*;

    /// Block source over a plain map.
    struct MapSource {
        blocks: Mutex<HashMap<Cid, Vec<u8>>>,
    }

    impl MapSource {
        fn from_mmr(payloads: &[&[u8]]) -> (Self, Cid) {
            let mut mmr = Mmr::new();
            let mut blocks = HashMap::new();
            for (i, payload) in payloads.iter().enumerate() {
                let trail = mmr.append(i as u64, payload).unwrap();
                for pair in trail.pairs {
                    blocks.insert(pair.cid, pair.data);
                }
            }
            let root = mmr.root().unwrap();
            (
                Self {
                    blocks: Mutex::new(blocks),
                },
                root,
            )
        }
    }

    #[async_trait]
    impl BlockStore for MapSource {
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        async fn fetch(&self, cid: &Cid, _cancel: &CancellationToken) -> Result<Vec<u8>> {
            self.blocks
                .lock()
                .get(cid)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("block {cid}")))
        }

        async fn put(&self, cid: &Cid, data: &[u8]) -> Result<()> {
            self.blocks.lock().insert(*cid, data.to_vec());
            Ok(())
        }

        async fn provide(&self, _cid: &Cid) {}
    }

    #[tokio::test]
    async fn resolves_leaves_in_append_order() {
        let payloads: Vec<&[u8]> = vec![&[0x01], &[0x02], &[0x03], &[0x04], &[0x05]];
        let (source, root) = MapSource::from_mmr(&payloads);
        let leaves = resolve_tree(&root, &source, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(leaves, payloads.iter().map(|p| p.to_vec()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn single_leaf_tree() {
        let (source, root) = MapSource::from_mmr(&[&[0xaa]]);
        let leaves = resolve_tree(&root, &source, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(leaves, vec![vec![0xaa]]);
    }

    #[tokio::test]
    async fn missing_block_fails_with_not_found() {
        let (source, root) = MapSource::from_mmr(&[&[0x01], &[0x02], &[0x03]]);
        // Drop the leaf for 0x02 out of the map.
        let victim = encode_node(&Node::Leaf(vec![0x02])).unwrap().cid;
        source.blocks.lock().remove(&victim);

        let err = resolve_tree(&root, &source, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn cancellation_yields_cancelled() {
        let (source, root) = MapSource::from_mmr(&[&[0x01], &[0x02]]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolve_tree(&root, &source, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn bare_link_blocks_are_followed() {
        let (source, root) = MapSource::from_mmr(&[&[0x01]]);
        // Wrap the root in a self-describing block.
        let wrapper = encode_node(&Node::Resolved(root)).unwrap();
        source
            .blocks
            .lock()
            .insert(wrapper.cid, wrapper.data.clone());

        let leaves = resolve_tree(&wrapper.cid, &source, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(leaves, vec![vec![0x01]]);
    }
}
