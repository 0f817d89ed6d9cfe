//! Simulated node: a real engine over the in-memory room

use std::collections::HashMap;
use std::sync::Arc;

use syncmap_core::{AcceptAll, MemoryRecordStore, Moderator, Record, RecordId, RecordStore};
use syncmap_engine::{PeerId, SyncConfig, SyncEngine};

use crate::room::Room;

/// A node in the simulation: production engine, memory store, room wiring
pub struct SimNode {
    pub id: PeerId,
    pub engine: Arc<SyncEngine>,
    pub store: Arc<MemoryRecordStore>,
}

impl SimNode {
    /// Join the room with default config and accept-all moderation
    pub fn join(room: &Arc<Room>, id: &str) -> Self {
        Self::join_with(room, id, Arc::new(AcceptAll), SyncConfig::default())
    }

    /// Join the room with a custom moderator and config
    pub fn join_with(
        room: &Arc<Room>,
        id: &str,
        moderator: Arc<dyn Moderator>,
        config: SyncConfig,
    ) -> Self {
        let (member, events) = room.join(id);
        let store = Arc::new(MemoryRecordStore::new());
        let engine = SyncEngine::new(config, store.clone(), moderator, member);
        engine.spawn(events);
        Self {
            id: id.to_string(),
            engine,
            store,
        }
    }

    /// Admit local records and announce the new root
    pub async fn publish(&self, records: HashMap<RecordId, Record>) -> usize {
        self.engine
            .publish_records(records)
            .await
            .expect("memory store put cannot fail")
    }

    /// Current merkle root
    pub fn root(&self) -> String {
        self.engine.root_hex()
    }

    /// Sorted uuids currently held
    pub async fn uuids(&self) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self
            .store
            .get_all()
            .await
            .expect("memory store read cannot fail")
            .into_keys()
            .collect();
        ids.sort();
        ids
    }
}

/// Build a valid record for a uuid: content hash computed, placeholder
/// signature
pub fn make_record(uuid: &str) -> Record {
    Record::new(
        uuid,
        1_700_000_000_000,
        "general",
        "ee11a5dff40c19a555f41fe42b48f00e618c91225622ae37b6c2bb67b76c4e49",
        format!("record {uuid}"),
        None,
        60.1699,
        24.9384,
    )
    .with_signature("00".repeat(64))
}

/// Build a batch of valid records
pub fn make_records(ids: &[&str]) -> HashMap<RecordId, Record> {
    ids.iter().map(|id| (id.to_string(), make_record(id))).collect()
}

/// Opt-in test logging; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
