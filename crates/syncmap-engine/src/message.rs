//! Wire protocol for peer-to-peer record reconciliation
//!
//! Five JSON message kinds, dispatched by a `"type"` tag. Field names are
//! camelCase on the wire. The protocol is stateless at the message level:
//! both peers run the same handlers and duplicate descent messages are
//! idempotent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use syncmap_core::{Record, RecordId, SubtreeSummary};

/// A sync protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    /// "This is my current root."
    #[serde(rename = "rootHash")]
    RootHash {
        #[serde(rename = "merkleRoot")]
        merkle_root: String,
    },

    /// "Send the summaries at this depth below `path`."
    #[serde(rename = "requestSubtreeHashes")]
    RequestSubtree { path: String, depth: u32 },

    /// Response to a subtree request
    #[serde(rename = "subtreeHashes")]
    SubtreeHashes { items: Vec<SubtreeSummary> },

    /// "Send me the full records for these identifiers."
    #[serde(rename = "requestRecords")]
    RequestRecords { uuids: Vec<RecordId> },

    /// Response to a record request
    #[serde(rename = "records")]
    Records { records: HashMap<RecordId, Record> },
}

impl SyncMessage {
    /// Message kind tag, for logging and stats
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::RootHash { .. } => "rootHash",
            SyncMessage::RequestSubtree { .. } => "requestSubtreeHashes",
            SyncMessage::SubtreeHashes { .. } => "subtreeHashes",
            SyncMessage::RequestRecords { .. } => "requestRecords",
            SyncMessage::Records { .. } => "records",
        }
    }

    /// Number of full records carried
    pub fn record_count(&self) -> usize {
        match self {
            SyncMessage::Records { records } => records.len(),
            _ => 0,
        }
    }

    /// Encoded size in bytes, for traffic accounting
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
