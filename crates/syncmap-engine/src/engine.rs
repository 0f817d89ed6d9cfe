//! Sync orchestrator
//!
//! Owns all per-peer state and drives the progressive merkle reconciliation
//! protocol. One engine instance serves one node; inbound room events are
//! consumed by a single loop so messages from a peer are handled in arrival
//! order. Timers (batch flush, sync timeout, debounced root recomputation,
//! completion check) are spawned tasks whose handles live in peer state;
//! removing a peer aborts everything it owns. Timer tasks hold only a weak
//! reference to the engine, so dropping the engine cancels them too.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use syncmap_core::{
    HashIndex, MerkleNode, Moderator, Record, RecordId, RecordStore, StoreError, SubtreeSummary,
    TreeCache,
};

use crate::config::SyncConfig;
use crate::message::SyncMessage;
use crate::peer::{adaptive_delay, PeerState, TrafficStats};
use crate::transport::{PeerId, RoomEvent, RoomTransport, TransportError};

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The per-node sync orchestrator
pub struct SyncEngine {
    pub(crate) config: SyncConfig,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) moderator: Arc<dyn Moderator>,
    pub(crate) index: HashIndex,
    pub(crate) tree_cache: TreeCache,
    pub(crate) transport: Arc<dyn RoomTransport>,
    pub(crate) peers: Mutex<HashMap<PeerId, PeerState>>,
    /// uuids dropped by moderation or malformed integrity data; never
    /// requested again, which keeps a moderated-away divergence stable
    pub(crate) rejected: RwLock<HashSet<RecordId>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        moderator: Arc<dyn Moderator>,
        transport: Arc<dyn RoomTransport>,
    ) -> Arc<Self> {
        let tree_cache = TreeCache::new(config.merkle_cache_ttl);
        Arc::new(Self {
            config,
            store,
            moderator,
            index: HashIndex::new(),
            tree_cache,
            transport,
            peers: Mutex::new(HashMap::new()),
            rejected: RwLock::new(HashSet::new()),
        })
    }

    /// Consume room events until the channel closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<RoomEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("room event stream closed");
    }

    /// Spawn the event loop onto the current runtime
    pub fn spawn(self: &Arc<Self>, events: mpsc::UnboundedReceiver<RoomEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(engine.run(events))
    }

    pub async fn handle_event(self: &Arc<Self>, event: RoomEvent) {
        match event {
            RoomEvent::PeerJoined(peer) => self.on_peer_join(peer).await,
            RoomEvent::PeerLeft(peer) => self.on_peer_leave(&peer).await,
            RoomEvent::Message { from, message } => self.on_message(from, message).await,
        }
    }

    // ------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------

    pub async fn on_peer_join(self: &Arc<Self>, peer: PeerId) {
        info!("peer {peer} joined");
        self.peers
            .lock()
            .await
            .insert(peer.clone(), PeerState::new());
        let root = self.root_hex();
        self.send_root(&peer, root).await;
    }

    pub async fn on_peer_leave(&self, peer: &PeerId) {
        info!("peer {peer} left");
        // PeerState::drop aborts every timer it owns
        self.peers.lock().await.remove(peer);
    }

    // ------------------------------------------------------------------
    // Message dispatch
    // ------------------------------------------------------------------

    pub async fn on_message(self: &Arc<Self>, from: PeerId, message: SyncMessage) {
        {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(&from) else {
                debug!("dropping {} from unknown peer {from}", message.kind());
                return;
            };
            state.last_activity = Instant::now();
            state.traffic.messages_received += 1;
            state.traffic.bytes_received += message.encoded_len() as u64;
            state.traffic.records_received += message.record_count() as u64;
        }

        match message {
            SyncMessage::RootHash { merkle_root } => self.on_root_hash(&from, merkle_root).await,
            SyncMessage::RequestSubtree { path, depth } => {
                self.on_request_subtree(&from, &path, depth).await
            }
            SyncMessage::SubtreeHashes { items } => self.on_subtree_hashes(&from, items).await,
            SyncMessage::RequestRecords { uuids } => self.on_request_records(&from, uuids).await,
            SyncMessage::Records { records } => self.ingest_from_peer(&from, records).await,
        }
    }

    async fn on_root_hash(self: &Arc<Self>, peer: &PeerId, merkle_root: String) {
        let local = self.root_hex();
        if local == merkle_root {
            debug!("in sync with {peer}");
            return;
        }

        {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(peer) else {
                return;
            };
            if state.processing_records || state.sync_in_progress {
                // busy with this peer; activity stamp above already
                // extended the timeout
                debug!("sync with {peer} already in progress");
                return;
            }
            state.sync_in_progress = true;
            if let Some(handle) = state.sync_timeout.take() {
                handle.abort();
            }
            state.sync_timeout = Some(self.spawn_sync_timeout(peer.clone()));
        }

        info!("root mismatch with {peer}, starting sync");
        self.send_to(
            peer,
            SyncMessage::RequestSubtree {
                path: String::new(),
                depth: 1,
            },
        )
        .await;
    }

    async fn on_request_subtree(self: &Arc<Self>, peer: &PeerId, path: &str, depth: u32) {
        let tree = self.tree();
        let items = match tree.subtree_at(path) {
            Some(node) => node.expose(path, depth),
            None => Vec::new(),
        };
        self.send_to(peer, SyncMessage::SubtreeHashes { items }).await;
    }

    async fn on_subtree_hashes(self: &Arc<Self>, peer: &PeerId, items: Vec<SubtreeSummary>) {
        let tree = self.tree();
        let mut descend = Vec::new();
        let mut needed = Vec::new();
        {
            let rejected = self.rejected.read().unwrap();
            for item in items {
                let matches = tree
                    .subtree_at(&item.path)
                    .map(|local| local.hash_hex() == item.hash)
                    .unwrap_or(false);
                if matches {
                    continue;
                }
                if item.has_children {
                    descend.push(item.path);
                } else {
                    for uuid in item.uuids {
                        if !self.index.contains(&uuid) && !rejected.contains(&uuid) {
                            needed.push(uuid);
                        }
                    }
                }
            }
        }

        let requested_more = !descend.is_empty() || !needed.is_empty();
        for path in descend {
            self.send_to(peer, SyncMessage::RequestSubtree { path, depth: 1 })
                .await;
        }
        self.batch_add(peer, needed).await;

        if !requested_more {
            // nothing differs below here and nothing is in flight from our
            // side; let the completion check settle the state machine
            let syncing = self
                .peers
                .lock()
                .await
                .get(peer)
                .map(|s| s.sync_in_progress)
                .unwrap_or(false);
            if syncing {
                self.schedule_completion_check(peer).await;
            }
        }
    }

    async fn on_request_records(self: &Arc<Self>, peer: &PeerId, uuids: Vec<RecordId>) {
        if uuids.is_empty() {
            debug!("empty record request from {peer}");
            return;
        }
        let records = match self.store.get_batch(&uuids).await {
            Ok(records) => records,
            Err(e) => {
                warn!("record lookup for {peer} failed: {e}");
                return;
            }
        };
        if records.len() < uuids.len() {
            debug!(
                "{peer} asked for {} records, found {}",
                uuids.len(),
                records.len()
            );
        }
        if records.is_empty() {
            return;
        }
        self.send_to(peer, SyncMessage::Records { records }).await;
    }

    // ------------------------------------------------------------------
    // Record-request batching
    // ------------------------------------------------------------------

    /// Accumulate needed uuids for `peer`. Flushes immediately at the size
    /// threshold; otherwise (re)arms the delay timer.
    pub(crate) async fn batch_add(self: &Arc<Self>, peer: &PeerId, uuids: Vec<RecordId>) {
        if uuids.is_empty() {
            return;
        }
        let mut full_batches = Vec::new();
        {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(peer) else {
                return;
            };
            for uuid in uuids {
                state.batch.uuids.insert(uuid);
                if state.batch.uuids.len() >= self.config.max_batch_size {
                    if let Some(handle) = state.batch.timer.take() {
                        handle.abort();
                    }
                    let uuids: Vec<RecordId> =
                        std::mem::take(&mut state.batch.uuids).into_iter().collect();
                    full_batches.push(uuids);
                }
            }
            if !state.batch.uuids.is_empty() {
                if let Some(handle) = state.batch.timer.take() {
                    handle.abort();
                }
                let weak = Arc::downgrade(self);
                let peer = peer.clone();
                let delay = self.config.batch_delay;
                state.batch.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(engine) = weak.upgrade() {
                        engine.flush_batch(&peer).await;
                    }
                }));
            }
        }
        for uuids in full_batches {
            self.send_to(peer, SyncMessage::RequestRecords { uuids })
                .await;
        }
    }

    /// Send whatever has accumulated for `peer`
    pub(crate) async fn flush_batch(self: &Arc<Self>, peer: &PeerId) {
        let uuids: Vec<RecordId> = {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(peer) else {
                return;
            };
            state.batch.timer = None;
            if state.batch.uuids.is_empty() {
                return;
            }
            std::mem::take(&mut state.batch.uuids).into_iter().collect()
        };
        self.send_to(peer, SyncMessage::RequestRecords { uuids })
            .await;
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn spawn_sync_timeout(self: &Arc<Self>, peer: PeerId) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let timeout = self.config.sync_timeout;
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(engine) = weak.upgrade() else { return };
                    let peers = engine.peers.lock().await;
                    let Some(state) = peers.get(&peer) else { return };
                    state.last_activity + timeout
                };
                if Instant::now() >= deadline {
                    if let Some(engine) = weak.upgrade() {
                        engine.cancel_sync(&peer, "inactivity timeout").await;
                    }
                    return;
                }
                tokio::time::sleep_until(deadline).await;
            }
        })
    }

    /// Schedule the debounced root recomputation for `peer`, replacing any
    /// pending one. The delay adapts to the recent batch arrival rate.
    pub(crate) async fn schedule_root_recompute(self: &Arc<Self>, peer: &PeerId) {
        let mut peers = self.peers.lock().await;
        let Some(state) = peers.get_mut(peer) else {
            return;
        };
        let delay = adaptive_delay(&state.batch_arrival_times, &self.config);
        if let Some(handle) = state.pending_recompute.take() {
            handle.abort();
        }
        let weak = Arc::downgrade(self);
        let peer = peer.clone();
        debug!("root recompute for {peer} in {delay:?}");
        state.pending_recompute = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                engine.recompute_root(&peer).await;
            }
        }));
    }

    async fn recompute_root(self: &Arc<Self>, peer: &PeerId) {
        {
            let mut peers = self.peers.lock().await;
            if let Some(state) = peers.get_mut(peer) {
                state.pending_recompute = None;
            }
        }
        let root = self.root_hex();
        if self.send_root_if_changed(peer, root).await {
            info!("root changed after ingest, reverse sync with {peer}");
        }
    }

    /// Schedule the deferred check that a sync has quiesced
    pub(crate) fn schedule_completion_check<'a>(
        self: &'a Arc<Self>,
        peer: &'a PeerId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(peer) else {
                return;
            };
            if let Some(handle) = state.completion_check.take() {
                handle.abort();
            }
            let weak = Arc::downgrade(self);
            let peer = peer.clone();
            let delay = self.config.completion_check_delay;
            state.completion_check = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(engine) = weak.upgrade() {
                    engine.completion_check(&peer).await;
                }
            }));
        })
    }

    fn completion_check<'a>(
        self: &'a Arc<Self>,
        peer: &'a PeerId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let clean = {
                let mut peers = self.peers.lock().await;
                let Some(state) = peers.get_mut(peer) else {
                    return;
                };
                state.completion_check = None;
                let clean = state.batch.uuids.is_empty()
                    && state.pending_recompute.is_none()
                    && !state.processing_records;
                if clean {
                    state.sync_in_progress = false;
                    if let Some(handle) = state.sync_timeout.take() {
                        handle.abort();
                    }
                }
                clean
            };

            if clean {
                debug!("sync with {peer} complete");
                let root = self.root_hex();
                self.send_root_if_changed(peer, root).await;
            } else {
                self.schedule_completion_check(peer).await;
            }
        })
    }

    /// Force-cancel a sync: clear flags, timers and batches for the peer
    /// as if it had left, but keep its state and counters
    pub(crate) async fn cancel_sync(&self, peer: &PeerId, reason: &str) {
        warn!("sync with {peer} cancelled: {reason}");
        let mut peers = self.peers.lock().await;
        if let Some(state) = peers.get_mut(peer) {
            state.reset_sync();
        }
    }

    // ------------------------------------------------------------------
    // Local operations
    // ------------------------------------------------------------------

    /// Admit locally produced records and announce the new root to every
    /// connected peer
    pub async fn publish_records(
        self: &Arc<Self>,
        records: HashMap<RecordId, Record>,
    ) -> Result<usize, EngineError> {
        let outcome = self.ingest(records).await?;
        if outcome.admitted > 0 {
            self.announce_root().await;
        }
        Ok(outcome.admitted)
    }

    /// Send the current root to every connected peer
    pub async fn announce_root(self: &Arc<Self>) {
        let root = self.root_hex();
        let peer_ids: Vec<PeerId> = self.peers.lock().await.keys().cloned().collect();
        for peer in peer_ids {
            self.send_root(&peer, root.clone()).await;
        }
    }

    /// Delete records older than `max_age` from the store and the hash
    /// index. Returns how many were pruned.
    pub async fn prune_older_than(&self, max_age: Duration) -> Result<usize, EngineError> {
        self.prune_older_than_at(max_age, now_ms()).await
    }

    pub async fn prune_older_than_at(
        &self,
        max_age: Duration,
        now_ms: u64,
    ) -> Result<usize, EngineError> {
        let cutoff_ms = now_ms.saturating_sub(max_age.as_millis() as u64);
        let all = self.store.get_all().await?;
        let mut pruned = Vec::new();
        for (id, record) in all {
            if record.created_at < cutoff_ms {
                self.store.delete(&id).await?;
                pruned.push(id);
            }
        }
        let count = pruned.len();
        if count > 0 {
            info!("pruned {count} records older than cutoff");
            self.index.remove(pruned);
        }
        Ok(count)
    }

    /// Current merkle root, lowercase hex
    pub fn root_hex(&self) -> String {
        self.tree().hash_hex()
    }

    /// Current tree (cached build)
    pub fn tree(&self) -> Arc<MerkleNode> {
        self.tree_cache.get_or_build(&self.index)
    }

    /// Number of records in the hash index
    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    /// Whether a sync with `peer` is currently in progress
    pub async fn is_syncing(&self, peer: &PeerId) -> bool {
        self.peers
            .lock()
            .await
            .get(peer)
            .map(|state| state.sync_in_progress)
            .unwrap_or(false)
    }

    /// Snapshot of per-peer traffic counters
    pub async fn stats(&self) -> HashMap<PeerId, TrafficStats> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(peer, state)| (peer.clone(), state.traffic))
            .collect()
    }

    /// Zero all traffic counters. Sync state is untouched.
    pub async fn reset_stats(&self) {
        for state in self.peers.lock().await.values_mut() {
            state.traffic = TrafficStats::default();
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a root announcement and remember it for the reverse-sync guard
    pub(crate) async fn send_root(&self, peer: &PeerId, root: String) {
        {
            let mut peers = self.peers.lock().await;
            if let Some(state) = peers.get_mut(peer) {
                state.last_root_sent = Some(root.clone());
            }
        }
        self.send_to(peer, SyncMessage::RootHash { merkle_root: root })
            .await;
    }

    /// Announce the root only when it differs from the last one sent to
    /// this peer. The compare and the guard update happen under a single
    /// lock acquisition, so the debounced recomputation and the completion
    /// check cannot both announce the same root. Returns whether a message
    /// went out.
    pub(crate) async fn send_root_if_changed(&self, peer: &PeerId, root: String) -> bool {
        {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(peer) else {
                return false;
            };
            if state.last_root_sent.as_deref() == Some(root.as_str()) {
                return false;
            }
            state.last_root_sent = Some(root.clone());
        }
        self.send_to(peer, SyncMessage::RootHash { merkle_root: root })
            .await;
        true
    }

    /// Send to one peer, updating traffic counters. Transport failures are
    /// logged and otherwise ignored; the next root exchange retries.
    pub(crate) async fn send_to(&self, peer: &PeerId, message: SyncMessage) {
        let bytes = message.encoded_len() as u64;
        let records = message.record_count() as u64;
        if let Err(e) = self.transport.send(message, Some(peer)).await {
            debug!("send to {peer} failed: {e}");
            return;
        }
        let mut peers = self.peers.lock().await;
        if let Some(state) = peers.get_mut(peer) {
            state.traffic.messages_sent += 1;
            state.traffic.bytes_sent += bytes;
            state.traffic.records_sent += records;
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
