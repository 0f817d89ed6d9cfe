//! Moderation interface
//!
//! A bulk predicate over incoming records. Total over its input: every uuid
//! in the batch gets a verdict.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use crate::record::Record;
use crate::types::RecordId;

/// Bulk admission predicate
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate_batch(
        &self,
        records: &HashMap<RecordId, Record>,
    ) -> HashMap<RecordId, bool>;
}

/// Admits everything
#[derive(Debug, Clone, Default)]
pub struct AcceptAll;

#[async_trait]
impl Moderator for AcceptAll {
    async fn moderate_batch(
        &self,
        records: &HashMap<RecordId, Record>,
    ) -> HashMap<RecordId, bool> {
        records.keys().map(|id| (id.clone(), true)).collect()
    }
}

/// Rejects a fixed set of uuids, admits the rest
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    denied: HashSet<RecordId>,
}

impl DenyList {
    pub fn new(denied: impl IntoIterator<Item = impl Into<RecordId>>) -> Self {
        Self {
            denied: denied.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Moderator for DenyList {
    async fn moderate_batch(
        &self,
        records: &HashMap<RecordId, Record>,
    ) -> HashMap<RecordId, bool> {
        records
            .keys()
            .map(|id| (id.clone(), !self.denied.contains(id)))
            .collect()
    }
}
