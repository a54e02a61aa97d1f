//! The reconciliation pipeline.
//!
//! Three movements keep the local mirror byte-identical to the chain:
//!
//! 1. a backward sweep from the latest append, inverting each event to
//!    reconstruct prior accumulator states, with concurrent cancelable
//!    DAG resolves that short-circuit the walk as soon as one lands;
//! 2. a forward live sync over either a newHeads subscription or
//!    polling, funneling every head into the same per-event commit;
//! 3. a walk-back over `previous_append_block` pointers that backfills
//!    any leaf the live channel skipped.
//!
//! Storage is canonical for payload presence; the in-memory accumulator
//! is canonical for the root. All accumulator and cursor mutations are
//! serialized behind one async lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cairn_chain::{subscribe_new_heads, ChainClient, ContractState};
use cairn_core::{Cid, Error, LeafEvent, Result};
use cairn_mmr::{bag_peaks, previous_root_and_peaks, Mmr};
use cairn_store::{DatasetStore, LeafRecord};

use crate::resolver::resolve_tree;
use crate::source::BlockStore;

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Block window size for the backward sweep.
    pub range_size: u64,
    /// Polling interval when no push channel is available.
    pub poll_interval: Duration,
    /// Hard timeout on the subscription support probe.
    pub probe_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            range_size: 1000,
            poll_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

/// Outcome of a republish run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepublishReport {
    /// Pairs pushed successfully.
    pub pushed: u64,
    /// Pairs that failed verification or the push itself.
    pub failed: u64,
}

/// Handle for a data subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSubscriberId(u64);

struct LeafSubscribers {
    next_id: u64,
    entries: Vec<(DataSubscriberId, Box<dyn FnMut(u64, &str) + Send>)>,
}

impl LeafSubscribers {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn subscribe(&mut self, callback: impl FnMut(u64, &str) + Send + 'static) -> DataSubscriberId {
        let id = DataSubscriberId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(callback)));
        id
    }

    fn unsubscribe(&mut self, id: DataSubscriberId) -> bool {
        match self.entries.iter().position(|(e, _)| *e == id) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    fn notify(&mut self, leaf_index: u64, payload_hex: &str) {
        for (_, callback) in &mut self.entries {
            callback(leaf_index, payload_hex);
        }
    }
}

/// State confined behind the pipeline's async lock.
struct Core {
    mmr: Mmr,
    last_processed_block: u64,
}

/// One in-flight resolve probe from the backward sweep.
struct Probe {
    handle: JoinHandle<Result<Vec<Vec<u8>>>>,
    token: CancellationToken,
    leaf_count: u64,
}

/// Probes with cancel-on-drop, so every exit path from the sweep tears
/// down outstanding resolves.
struct ProbeSet {
    probes: Vec<Probe>,
}

impl ProbeSet {
    fn new() -> Self {
        Self { probes: Vec::new() }
    }

    fn spawn(&mut self, blocks: Arc<dyn BlockStore>, root: Cid, leaf_count: u64) {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            resolve_tree(&root, blocks.as_ref(), &task_token).await
        });
        debug!(%root, leaf_count, "resolve probe started");
        self.probes.push(Probe {
            handle,
            token,
            leaf_count,
        });
    }

    /// First finished probe that resolved, if any. Failed probes are
    /// treated as "not yet" and dropped.
    async fn take_first_success(&mut self) -> Option<(u64, Vec<Vec<u8>>)> {
        // Let freshly spawned probes make progress before checking.
        tokio::task::yield_now().await;
        let mut i = 0;
        while i < self.probes.len() {
            if self.probes[i].handle.is_finished() {
                let probe = self.probes.swap_remove(i);
                match probe.handle.await {
                    Ok(Ok(leaves)) => return Some((probe.leaf_count, leaves)),
                    Ok(Err(e)) => debug!(error = %e, "resolve probe came back empty"),
                    Err(e) => debug!(error = %e, "resolve probe task failed"),
                }
            } else {
                i += 1;
            }
        }
        None
    }
}

impl Drop for ProbeSet {
    fn drop(&mut self) {
        for probe in &self.probes {
            probe.token.cancel();
            probe.handle.abort();
        }
    }
}

/// The reconciliation pipeline.
pub struct Pipeline {
    chain: Arc<ChainClient>,
    blocks: Option<Arc<dyn BlockStore>>,
    store: DatasetStore,
    config: SyncConfig,
    core: AsyncMutex<Core>,
    subscribers: parking_lot::Mutex<LeafSubscribers>,
    live_sync_running: AtomicBool,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Assemble a pipeline over its collaborators.
    pub fn new(
        chain: Arc<ChainClient>,
        blocks: Option<Arc<dyn BlockStore>>,
        store: DatasetStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            chain,
            blocks,
            store,
            config,
            core: AsyncMutex::new(Core {
                mmr: Mmr::new(),
                last_processed_block: 0,
            }),
            subscribers: parking_lot::Mutex::new(LeafSubscribers::new()),
            live_sync_running: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The dataset store this pipeline commits into.
    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    /// The chain client this pipeline reads from.
    pub fn chain(&self) -> &Arc<ChainClient> {
        &self.chain
    }

    /// Seed the forward cursor, typically to just before the deploy block.
    pub async fn seed_cursor(&self, block: u64) {
        let mut core = self.core.lock().await;
        core.last_processed_block = core.last_processed_block.max(block);
    }

    /// Forward cursor value.
    pub async fn last_processed_block(&self) -> u64 {
        self.core.lock().await.last_processed_block
    }

    /// Leaves committed to the in-memory accumulator.
    pub async fn mmr_leaf_count(&self) -> u64 {
        self.core.lock().await.mmr.leaf_count()
    }

    /// Root of the in-memory accumulator.
    pub async fn mmr_root(&self) -> Result<Cid> {
        self.core.lock().await.mmr.root()
    }

    /// Register a data subscriber invoked as `(leaf_index, payload_hex)`.
    pub fn subscribe(&self, callback: impl FnMut(u64, &str) + Send + 'static) -> DataSubscriberId {
        self.subscribers.lock().subscribe(callback)
    }

    /// Drop a data subscriber.
    pub fn unsubscribe(&self, id: DataSubscriberId) -> bool {
        self.subscribers.lock().unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // Backward sweep
    // ------------------------------------------------------------------

    /// Reconstruct history from the latest append down to local coverage,
    /// short-circuiting through the block store when a resolve lands.
    pub async fn sync_backwards_from_latest(&self) -> Result<()> {
        let (state, raw_peaks) = self.chain.state().await?;
        if state.leaf_count == 0 {
            debug!("chain is empty, nothing to sweep");
            return self.finish_sweep(&state).await;
        }

        let mut oldest_peaks = state.peaks(&raw_peaks)?;
        let peak_cids: Vec<Cid> = oldest_peaks.iter().map(|p| p.cid).collect();
        let (mut oldest_root, _) = bag_peaks(&peak_cids)?;
        let highest_local = self.store.highest_contiguous_leaf_index_with_data()?;

        info!(
            chain_leaves = state.leaf_count,
            local_through = highest_local,
            "backward sweep starting"
        );

        let mut next_index = state.leaf_count - 1;
        let mut window_end = state.previous_append_block;
        let mut probes = ProbeSet::new();

        'sweep: loop {
            if (next_index as i64) <= highest_local {
                debug!(next_index, "local data covers the rest of history");
                break 'sweep;
            }

            let window_start = window_end
                .saturating_sub(self.config.range_size.max(1) - 1)
                .max(state.deploy_block);
            let mut events = self.chain.leaf_appended_logs(window_start, window_end).await?;
            events.sort_by(|a, b| b.leaf_index.cmp(&a.leaf_index));

            for event in events {
                if event.leaf_index != next_index {
                    return Err(Error::invariant(format!(
                        "sweep expected leaf {next_index}, chain produced {}",
                        event.leaf_index
                    )));
                }
                let (previous_root, previous_peaks) =
                    previous_root_and_peaks(&oldest_peaks, &event.new_data, &event.left_inputs)?;
                let record = LeafRecord::from_event(&event)
                    .with_prestate(previous_root, previous_peaks.clone());
                self.store.put_leaf_record(&record)?;
                oldest_root = previous_root;
                oldest_peaks = previous_peaks;

                if next_index == 0 {
                    break 'sweep;
                }
                next_index -= 1;
            }

            if let Some(blocks) = &self.blocks {
                probes.spawn(Arc::clone(blocks), oldest_root, next_index + 1);
            }

            if let Some((leaf_count, leaves)) = probes.take_first_success().await {
                if leaves.len() as u64 != leaf_count {
                    return Err(Error::invariant(format!(
                        "resolve of prior root yielded {} leaves, expected {leaf_count}",
                        leaves.len()
                    )));
                }
                info!(leaf_count, "sweep short-circuited through the block store");
                for (i, payload) in leaves.into_iter().enumerate() {
                    self.store
                        .put_leaf_record(&LeafRecord::payload_only(i as u64, payload))?;
                }
                return self.finish_sweep(&state).await;
            }

            if window_start <= state.deploy_block {
                break 'sweep;
            }
            window_end = window_start - 1;
        }

        self.finish_sweep(&state).await
    }

    /// Common sweep exit: no gaps allowed, state on disk, cursor advanced.
    async fn finish_sweep(&self, state: &ContractState) -> Result<()> {
        let gaps = self.store.missing_leaf_indices()?;
        if !gaps.is_empty() {
            return Err(Error::invariant(format!(
                "sweep finished with {} missing leaves, first at {}",
                gaps.len(),
                gaps[0]
            )));
        }
        self.store.persist()?;
        let mut core = self.core.lock().await;
        core.last_processed_block = core.last_processed_block.max(state.previous_append_block);
        info!(
            through_block = core.last_processed_block,
            "backward sweep finished"
        );
        Ok(())
    }

    /// Commit every stored-but-uncommitted leaf to the accumulator.
    ///
    /// Run after a sweep so the trail log and root exist before the
    /// first live event arrives.
    pub async fn rebuild_from_store(&self) -> Result<()> {
        let target = self.store.highest_contiguous_leaf_index_with_data()?;
        if target < 0 {
            return Ok(());
        }
        let mut core = self.core.lock().await;
        let from = core.mmr.leaf_count();
        for i in from..=target as u64 {
            let payload = self.store.leaf_payload(i)?.ok_or_else(|| {
                Error::invariant(format!("leaf {i} vanished during accumulator rebuild"))
            })?;
            self.commit_leaf(&mut core, i, &payload).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Live sync
    // ------------------------------------------------------------------

    /// Start following the chain head, preferring a push subscription
    /// and falling back to polling.
    pub async fn start_live_sync(self: &Arc<Self>) -> Result<()> {
        if self.live_sync_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(ws_url) = self.chain.config().ws_url.clone() {
            match subscribe_new_heads(&ws_url, self.config.probe_timeout).await {
                Ok(mut subscription) => {
                    info!("live sync over newHeads subscription");
                    let pipeline = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        while pipeline.live_sync_running.load(Ordering::SeqCst) {
                            match subscription.next_head().await {
                                Some(head) => {
                                    if let Err(e) = pipeline.on_new_head().await {
                                        warn!(head, error = %e, "head processing failed");
                                    }
                                }
                                None => {
                                    warn!("newHeads channel closed, live sync stopping");
                                    break;
                                }
                            }
                        }
                    });
                    self.tasks.lock().push(task);
                    return Ok(());
                }
                Err(e) => {
                    info!(error = %e, "subscription probe failed, polling instead");
                }
            }
        }

        info!(interval = ?self.config.poll_interval, "live sync over polling");
        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            while pipeline.live_sync_running.load(Ordering::SeqCst) {
                if let Err(e) = pipeline.on_new_head().await {
                    warn!(error = %e, "poll cycle failed");
                }
                tokio::time::sleep(pipeline.config.poll_interval).await;
            }
        });
        self.tasks.lock().push(task);
        Ok(())
    }

    /// Stop the live sync tasks. Idempotent.
    pub fn stop_live_sync(&self) {
        if !self.live_sync_running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("live sync stopped");
    }

    /// Whether live sync is running.
    pub fn is_live(&self) -> bool {
        self.live_sync_running.load(Ordering::SeqCst)
    }

    /// One head's worth of work: fetch new append logs and commit them.
    pub async fn on_new_head(&self) -> Result<()> {
        let (state, _) = self.chain.state().await?;
        let latest_append = state.previous_append_block;
        let mut core = self.core.lock().await;
        if latest_append <= core.last_processed_block {
            return Ok(());
        }
        let from = core.last_processed_block + 1;
        let mut events = self.chain.leaf_appended_logs(from, latest_append).await?;
        events.sort_by_key(|e| e.leaf_index);
        debug!(from, to = latest_append, count = events.len(), "new appends");
        for event in events {
            self.process_event_locked(&mut core, event, Some(state.leaf_count))
                .await?;
        }
        core.last_processed_block = latest_append;
        Ok(())
    }

    /// Commit one observed append event (public entry point).
    pub async fn process_event(
        &self,
        event: LeafEvent,
        chain_leaf_count: Option<u64>,
    ) -> Result<()> {
        let mut core = self.core.lock().await;
        self.process_event_locked(&mut core, event, chain_leaf_count)
            .await
    }

    async fn process_event_locked(
        &self,
        core: &mut Core,
        event: LeafEvent,
        chain_leaf_count: Option<u64>,
    ) -> Result<()> {
        // Database side: backfill anything the live channel skipped by
        // chasing previous_append_block pointers, one log per leaf.
        let highest_db = self.store.highest_contiguous_leaf_index_with_data()?;
        if (event.leaf_index as i64) > highest_db {
            if (event.leaf_index as i64) > highest_db + 1 {
                let mut missed = Vec::new();
                let mut index = event.leaf_index - 1;
                let mut block = event.previous_append_block;
                while (index as i64) > highest_db {
                    debug!(leaf = index, block, "walking back for a missed append");
                    let earlier = self.chain.leaf_event_at(index, block).await?;
                    block = earlier.previous_append_block;
                    missed.push(earlier);
                    if index == 0 {
                        break;
                    }
                    index -= 1;
                }
                for earlier in missed.into_iter().rev() {
                    self.store.put_leaf_record(&LeafRecord::from_event(&earlier))?;
                }
            }
            self.store.put_leaf_record(&LeafRecord::from_event(&event))?;
        }

        // Accumulator side: a leaf at or below the committed height is a
        // duplicate and a no-op.
        let committed = core.mmr.leaf_count() as i64 - 1;
        if (event.leaf_index as i64) <= committed {
            debug!(leaf = event.leaf_index, "duplicate event ignored");
            return Ok(());
        }
        for i in core.mmr.leaf_count()..event.leaf_index {
            let payload = self.store.leaf_payload(i)?.ok_or_else(|| {
                Error::invariant(format!(
                    "payload for leaf {i} missing while catching the accumulator up"
                ))
            })?;
            self.commit_leaf(core, i, &payload).await?;
        }
        self.commit_leaf(core, event.leaf_index, &event.new_data)
            .await?;

        // Once fully caught up, sanity-check the root against the chain.
        // A mismatch is loud but not fatal.
        if chain_leaf_count == Some(core.mmr.leaf_count()) {
            match self.chain.root_cid().await {
                Ok(chain_root) => {
                    let local_root = core.mmr.root()?;
                    if local_root != chain_root {
                        warn!(%local_root, %chain_root, "local root differs from chain root");
                    } else {
                        debug!(%local_root, "root matches chain");
                    }
                }
                Err(e) => debug!(error = %e, "root comparison skipped"),
            }
        }
        Ok(())
    }

    /// Append one leaf: record the pre-state, extend the accumulator,
    /// log and publish the trail, then notify subscribers.
    async fn commit_leaf(&self, core: &mut Core, leaf_index: u64, payload: &[u8]) -> Result<()> {
        let pre_root = core.mmr.root()?;
        let pre_peaks = core.mmr.peaks_with_heights();
        self.store
            .fill_leaf_prestate(leaf_index, &pre_root, &pre_peaks)?;

        let trail = core.mmr.append(leaf_index, payload)?;
        for pair in &trail.pairs {
            let fresh = self.store.append_trail_pair(&pair.cid, &pair.data)?;
            if !fresh {
                continue;
            }
            if let Some(blocks) = &self.blocks {
                if blocks.capabilities().put {
                    match blocks.put(&pair.cid, &pair.data).await {
                        Ok(()) => {
                            if blocks.capabilities().provide {
                                blocks.provide(&pair.cid).await;
                            }
                        }
                        Err(e) => warn!(cid = %pair.cid, error = %e, "block publish failed"),
                    }
                }
            }
        }

        self.subscribers
            .lock()
            .notify(leaf_index, &hex::encode(payload));
        debug!(leaf = leaf_index, root = %trail.root, "leaf committed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Republish
    // ------------------------------------------------------------------

    /// Re-verify and re-push the whole trail log to the block store.
    ///
    /// Individual failures are counted, never fatal.
    pub async fn republish(&self) -> Result<RepublishReport> {
        let blocks = self
            .blocks
            .as_ref()
            .ok_or_else(|| Error::config("republish requires a block write endpoint"))?;
        let mut report = RepublishReport::default();
        let Some(max_index) = self.store.trail_max_index()? else {
            return Ok(report);
        };
        for n in 0..=max_index {
            match self.store.trail_pair(n) {
                Ok(Some((cid, data))) => match blocks.put(&cid, &data).await {
                    Ok(()) => {
                        report.pushed += 1;
                        if blocks.capabilities().provide {
                            blocks.provide(&cid).await;
                        }
                    }
                    Err(e) => {
                        warn!(%cid, error = %e, "republish push failed");
                        report.failed += 1;
                    }
                },
                Ok(None) => {
                    warn!(n, "trail entry missing");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(n, error = %e, "trail entry unreadable");
                    report.failed += 1;
                }
            }
        }
        info!(pushed = report.pushed, failed = report.failed, "republish finished");
        Ok(report)
    }
}
