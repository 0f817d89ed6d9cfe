//! Record store interfaces and the in-memory implementation
//!
//! The durable mapping `uuid -> record`. Batched puts are atomic: a batch
//! appears fully or not at all to subsequent reads.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::record::Record;
use crate::types::RecordId;

/// Store error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store error: {0}")]
    Other(String),
}

/// Durable keyed record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a batch of records. Atomic: either every record commits or
    /// none do.
    async fn put_batch(&self, records: HashMap<RecordId, Record>) -> Result<(), StoreError>;

    /// Fetch the records present for the given ids; missing ids are simply
    /// absent from the result
    async fn get_batch(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, Record>, StoreError>;

    /// Enumerate everything
    async fn get_all(&self) -> Result<HashMap<RecordId, Record>, StoreError>;

    /// Delete by uuid; deleting a missing record is not an error
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Drop all records
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-memory record store for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    data: Arc<RwLock<HashMap<RecordId, Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put_batch(&self, records: HashMap<RecordId, Record>) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap();
        data.extend(records);
        Ok(())
    }

    async fn get_batch(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, Record>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| data.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }

    async fn get_all(&self) -> Result<HashMap<RecordId, Record>, StoreError> {
        Ok(self.data.read().unwrap().clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.data.write().unwrap().remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.data.write().unwrap().clear();
        Ok(())
    }
}
