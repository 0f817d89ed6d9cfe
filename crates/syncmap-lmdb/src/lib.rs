//! syncmap-lmdb - Durable storage on LMDB
//!
//! One environment with two named databases:
//! - `records`: uuid -> record JSON
//! - `session`: single `loginToken` key -> login token JSON
//!
//! Batched record puts run in a single write transaction, so a batch
//! commits fully or not at all.

use std::path::Path;

use async_trait::async_trait;
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions};
use std::collections::HashMap;

use syncmap_core::{Record, RecordId, RecordStore, StoreError};
use syncmap_keys::{KeyError, LoginToken, SessionStore};

const RECORDS_DB: &str = "records";
const SESSION_DB: &str = "session";
const SESSION_KEY: &str = "loginToken";

/// Default map size: 1 GiB
const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// LMDB-backed record and session store
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    records: Database<Str, SerdeJson<Record>>,
    session: Database<Str, SerdeJson<LoginToken>>,
}

fn lmdb_err(e: heed::Error) -> StoreError {
    StoreError::Other(e.to_string())
}

fn session_err(e: heed::Error) -> KeyError {
    KeyError::Store(e.to_string())
}

impl LmdbStore {
    /// Open (creating if needed) the store under `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(DEFAULT_MAP_SIZE)
                .max_dbs(2)
                .open(path)
        }
        .map_err(lmdb_err)?;

        let mut wtxn = env.write_txn().map_err(lmdb_err)?;
        let records = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(lmdb_err)?;
        let session = env
            .create_database(&mut wtxn, Some(SESSION_DB))
            .map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)?;

        Ok(Self {
            env,
            records,
            session,
        })
    }

    /// Number of stored records
    pub fn record_count(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn().map_err(lmdb_err)?;
        self.records.len(&rtxn).map_err(lmdb_err)
    }
}

#[async_trait]
impl RecordStore for LmdbStore {
    async fn put_batch(&self, records: HashMap<RecordId, Record>) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(lmdb_err)?;
        for (id, record) in &records {
            self.records.put(&mut wtxn, id, record).map_err(lmdb_err)?;
        }
        wtxn.commit().map_err(lmdb_err)
    }

    async fn get_batch(&self, ids: &[RecordId]) -> Result<HashMap<RecordId, Record>, StoreError> {
        let rtxn = self.env.read_txn().map_err(lmdb_err)?;
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.records.get(&rtxn, id).map_err(lmdb_err)? {
                out.insert(id.clone(), record);
            }
        }
        Ok(out)
    }

    async fn get_all(&self) -> Result<HashMap<RecordId, Record>, StoreError> {
        let rtxn = self.env.read_txn().map_err(lmdb_err)?;
        let mut out = HashMap::new();
        for item in self.records.iter(&rtxn).map_err(lmdb_err)? {
            let (id, record) = item.map_err(lmdb_err)?;
            out.insert(id.to_string(), record);
        }
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(lmdb_err)?;
        self.records.delete(&mut wtxn, id).map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut wtxn = self.env.write_txn().map_err(lmdb_err)?;
        self.records.clear(&mut wtxn).map_err(lmdb_err)?;
        wtxn.commit().map_err(lmdb_err)
    }
}

impl SessionStore for LmdbStore {
    fn put_token(&self, token: &LoginToken) -> Result<(), KeyError> {
        let mut wtxn = self.env.write_txn().map_err(session_err)?;
        self.session
            .put(&mut wtxn, SESSION_KEY, token)
            .map_err(session_err)?;
        wtxn.commit().map_err(session_err)
    }

    fn get_token(&self) -> Result<Option<LoginToken>, KeyError> {
        let rtxn = self.env.read_txn().map_err(session_err)?;
        self.session.get(&rtxn, SESSION_KEY).map_err(session_err)
    }

    fn delete_token(&self) -> Result<(), KeyError> {
        let mut wtxn = self.env.write_txn().map_err(session_err)?;
        self.session
            .delete(&mut wtxn, SESSION_KEY)
            .map_err(session_err)?;
        wtxn.commit().map_err(session_err)
    }
}
