//! In-memory hash index: `uuid -> content hash`
//!
//! Kept coherent with the record store by the ingestion pipeline. Writes go
//! through a FIFO queue drained by a single worker at a time; each drained
//! update is applied to a copy of the current snapshot which then replaces
//! it atomically, so readers always observe a consistent snapshot.
//!
//! Every effective change bumps a version counter. The merkle cache is keyed
//! by that version.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use crate::types::{Hash, RecordId};

/// A consistent view of the index at some version
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    /// uuid -> content hash, ordered by uuid (lexicographic)
    pub entries: BTreeMap<RecordId, Hash>,
    pub version: u64,
}

/// Queued index mutation
#[derive(Debug, Clone)]
pub enum IndexUpdate {
    Upsert(Vec<(RecordId, Hash)>),
    Remove(Vec<RecordId>),
    Clear,
}

/// Thread-safe hash index with a single-writer update queue
#[derive(Debug, Default)]
pub struct HashIndex {
    inner: RwLock<IndexSnapshot>,
    queue: Mutex<VecDeque<IndexUpdate>>,
    draining: AtomicBool,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace entries
    pub fn upsert(&self, entries: Vec<(RecordId, Hash)>) {
        self.enqueue(IndexUpdate::Upsert(entries));
    }

    /// Remove entries
    pub fn remove(&self, ids: Vec<RecordId>) {
        self.enqueue(IndexUpdate::Remove(ids));
    }

    /// Drop everything
    pub fn clear(&self) {
        self.enqueue(IndexUpdate::Clear);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().unwrap().entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Hash> {
        self.inner.read().unwrap().entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.inner.read().unwrap().version
    }

    /// Clone the current snapshot
    pub fn snapshot(&self) -> IndexSnapshot {
        self.inner.read().unwrap().clone()
    }

    fn enqueue(&self, update: IndexUpdate) {
        self.queue.lock().unwrap().push_back(update);
        self.pump();
    }

    /// Drain the queue if no other worker is active. Re-checks after
    /// releasing the drain flag so an update raced in during release is
    /// not left behind.
    fn pump(&self) {
        loop {
            if self.draining.swap(true, Ordering::Acquire) {
                return;
            }
            loop {
                let next = self.queue.lock().unwrap().pop_front();
                match next {
                    Some(update) => self.apply(update),
                    None => break,
                }
            }
            self.draining.store(false, Ordering::Release);
            if self.queue.lock().unwrap().is_empty() {
                return;
            }
        }
    }

    fn apply(&self, update: IndexUpdate) {
        let mut snap = self.inner.read().unwrap().clone();
        let changed = match update {
            IndexUpdate::Upsert(entries) => {
                let mut changed = false;
                for (id, hash) in entries {
                    if snap.entries.get(&id) != Some(&hash) {
                        snap.entries.insert(id, hash);
                        changed = true;
                    }
                }
                changed
            }
            IndexUpdate::Remove(ids) => {
                let mut changed = false;
                for id in &ids {
                    changed |= snap.entries.remove(id).is_some();
                }
                changed
            }
            IndexUpdate::Clear => {
                let changed = !snap.entries.is_empty();
                snap.entries.clear();
                changed
            }
        };
        if changed {
            snap.version += 1;
            *self.inner.write().unwrap() = snap;
        }
    }
}
