//! Record ingestion pipeline
//!
//! Incoming record batches run through moderation in bulk, are persisted
//! with one atomic batched put, and land in the hash index. The merkle root
//! is never recomputed synchronously per batch; a debounced recomputation
//! is scheduled instead, followed by a completion check.
//!
//! A single bad record (moderation reject, uuid mismatch, malformed hash)
//! is dropped and denylisted without aborting the batch. A store failure
//! aborts the whole batch and clears the peer's sync state; the next root
//! exchange retries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;

use tracing::{debug, warn};

use syncmap_core::{from_hex, Hash, Record, RecordId, StoreError};

use crate::engine::SyncEngine;
use crate::transport::PeerId;

/// What a batch boiled down to
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOutcome {
    pub admitted: usize,
    pub dropped: usize,
}

impl SyncEngine {
    /// Handle a `records` message from `peer`
    pub(crate) async fn ingest_from_peer(
        self: &Arc<Self>,
        peer: &PeerId,
        records: HashMap<RecordId, Record>,
    ) {
        if records.is_empty() {
            debug!("empty record batch from {peer}");
            return;
        }

        {
            let mut peers = self.peers.lock().await;
            let Some(state) = peers.get_mut(peer) else {
                return;
            };
            state.processing_records = true;
            state.push_batch_arrival(Instant::now(), self.config.batch_timing_history);
        }

        let result = self.ingest(records).await;

        {
            let mut peers = self.peers.lock().await;
            if let Some(state) = peers.get_mut(peer) {
                state.processing_records = false;
            }
        }

        match result {
            Ok(outcome) => {
                debug!(
                    "ingested {} records from {peer} ({} dropped)",
                    outcome.admitted, outcome.dropped
                );
                self.schedule_root_recompute(peer).await;
                self.schedule_completion_check(peer).await;
            }
            Err(e) => {
                warn!("failed to persist batch from {peer}: {e}");
                self.cancel_sync(peer, "batch persistence failure").await;
            }
        }
    }

    /// Moderate, persist and index a batch. Shared by remote ingestion and
    /// local publication.
    pub(crate) async fn ingest(
        &self,
        records: HashMap<RecordId, Record>,
    ) -> Result<IngestOutcome, StoreError> {
        let verdicts = self.moderator.moderate_batch(&records).await;

        let mut approved: HashMap<RecordId, Record> = HashMap::new();
        let mut index_entries: Vec<(RecordId, Hash)> = Vec::new();
        let mut dropped: Vec<RecordId> = Vec::new();

        for (id, record) in records {
            if !verdicts.get(&id).copied().unwrap_or(false) {
                debug!("moderation rejected {id}");
                dropped.push(id);
                continue;
            }
            if record.uuid != id {
                warn!("record keyed as {id} claims uuid {}", record.uuid);
                dropped.push(id);
                continue;
            }
            if !record.verify_hash() {
                warn!("content hash mismatch for {id}");
                dropped.push(id);
                continue;
            }
            let hash = match from_hex(&record.integrity.hash) {
                Ok(hash) => hash,
                Err(_) => {
                    warn!("malformed content hash for {id}");
                    dropped.push(id);
                    continue;
                }
            };
            index_entries.push((id.clone(), hash));
            approved.insert(id, record);
        }

        let outcome = IngestOutcome {
            admitted: approved.len(),
            dropped: dropped.len(),
        };

        if !dropped.is_empty() {
            self.rejected.write().unwrap().extend(dropped);
        }
        if approved.is_empty() {
            return Ok(outcome);
        }

        // atomic: the batch commits fully or the error aborts it whole
        self.store.put_batch(approved).await?;
        self.index.upsert(index_entries);

        Ok(outcome)
    }
}
