//! Deterministic binary merkle tree over the hash index
//!
//! Construction: leaves are `(uuid, content_hash)` sorted by uuid; adjacent
//! nodes are paired level by level, hashing the concatenation of the two
//! child hashes in lowercase hex. An odd trailing node is promoted to the
//! next level unchanged. The empty index yields a distinguished leaf whose
//! hash is `SHA256("")`, so two empty trees compare equal.
//!
//! Every node carries the sorted set of uuids reachable beneath it, which
//! lets a peer stop descending as soon as a subtree summary at leaf depth
//! differs: the summary already names the uuids to fetch.
//!
//! The tree is derived state. Builds are cached for a short TTL keyed by
//! the exact index version; any index change invalidates the cache.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::hash::{empty_digest, sha256};
use crate::index::{HashIndex, IndexSnapshot};
use crate::types::{to_hex, Hash, RecordId};

/// Path token for the left child
pub const PATH_LEFT: &str = "left";
/// Path token for the right child
pub const PATH_RIGHT: &str = "right";

/// A node of the merkle tree
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleNode {
    pub hash: Hash,
    /// Sorted uuids of every record in this subtree
    pub uuids: Vec<RecordId>,
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    pub is_leaf: bool,
}

/// Wire summary of one node, exchanged during progressive descent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtreeSummary {
    /// Dotted `left`/`right` token path from the root; empty = root
    pub path: String,
    /// Node hash, lowercase hex
    pub hash: String,
    /// uuids beneath this node
    pub uuids: Vec<RecordId>,
    #[serde(rename = "hasChildren")]
    pub has_children: bool,
}

/// Root node for an empty index
pub fn empty_root() -> MerkleNode {
    MerkleNode {
        hash: empty_digest(),
        uuids: Vec::new(),
        left: None,
        right: None,
        is_leaf: true,
    }
}

/// Build the canonical tree from an index snapshot
pub fn build_tree(snapshot: &IndexSnapshot) -> MerkleNode {
    if snapshot.entries.is_empty() {
        return empty_root();
    }

    // BTreeMap iteration is already sorted by uuid
    let mut level: Vec<MerkleNode> = snapshot
        .entries
        .iter()
        .map(|(uuid, hash)| MerkleNode {
            hash: *hash,
            uuids: vec![uuid.clone()],
            left: None,
            right: None,
            is_leaf: true,
        })
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut nodes = level.into_iter();
        while let Some(left) = nodes.next() {
            match nodes.next() {
                Some(right) => next.push(join_nodes(left, right)),
                // odd trailing node moves up unchanged
                None => next.push(left),
            }
        }
        level = next;
    }

    level.remove(0)
}

fn join_nodes(left: MerkleNode, right: MerkleNode) -> MerkleNode {
    let mut preimage = String::with_capacity(128);
    preimage.push_str(&to_hex(&left.hash));
    preimage.push_str(&to_hex(&right.hash));
    let hash = sha256(preimage.as_bytes());

    let mut uuids = Vec::with_capacity(left.uuids.len() + right.uuids.len());
    uuids.extend_from_slice(&left.uuids);
    uuids.extend_from_slice(&right.uuids);
    uuids.sort();

    MerkleNode {
        hash,
        uuids,
        left: Some(Box::new(left)),
        right: Some(Box::new(right)),
        is_leaf: false,
    }
}

fn child_path(base: &str, token: &str) -> String {
    if base.is_empty() {
        token.to_string()
    } else {
        format!("{base}.{token}")
    }
}

impl MerkleNode {
    /// Node hash as lowercase hex
    pub fn hash_hex(&self) -> String {
        to_hex(&self.hash)
    }

    /// Follow a dotted `left`/`right` path from this node.
    /// The empty path is this node; unknown tokens or paths past a leaf
    /// resolve to None.
    pub fn subtree_at(&self, path: &str) -> Option<&MerkleNode> {
        if path.is_empty() {
            return Some(self);
        }
        let mut node = self;
        for token in path.split('.') {
            node = match token {
                PATH_LEFT => node.left.as_deref()?,
                PATH_RIGHT => node.right.as_deref()?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Summaries of every descendant at exactly `depth` levels below this
    /// node. `depth == 0` is the singleton summary of this node. Branches
    /// that end early (leaves above `depth`) contribute nothing.
    pub fn expose(&self, base_path: &str, depth: u32) -> Vec<SubtreeSummary> {
        if depth == 0 {
            return vec![self.summary(base_path)];
        }
        let mut out = Vec::new();
        if let Some(left) = &self.left {
            out.extend(left.expose(&child_path(base_path, PATH_LEFT), depth - 1));
        }
        if let Some(right) = &self.right {
            out.extend(right.expose(&child_path(base_path, PATH_RIGHT), depth - 1));
        }
        out
    }

    fn summary(&self, path: &str) -> SubtreeSummary {
        SubtreeSummary {
            path: path.to_string(),
            hash: self.hash_hex(),
            uuids: self.uuids.clone(),
            has_children: !self.is_leaf && (self.left.is_some() || self.right.is_some()),
        }
    }
}

/// Single-slot cache over the most recent build. A cached tree is served
/// while its index version still matches and it is younger than the TTL.
#[derive(Debug)]
pub struct TreeCache {
    ttl: Duration,
    slot: Mutex<Option<CachedTree>>,
}

#[derive(Debug)]
struct CachedTree {
    tree: Arc<MerkleNode>,
    version: u64,
    built_at: Instant,
}

impl TreeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Fetch the cached tree or rebuild from the current index snapshot
    pub fn get_or_build(&self, index: &HashIndex) -> Arc<MerkleNode> {
        let mut slot = self.slot.lock().unwrap();
        let version = index.version();
        if let Some(cached) = slot.as_ref() {
            if cached.version == version && cached.built_at.elapsed() <= self.ttl {
                return cached.tree.clone();
            }
        }
        let snapshot = index.snapshot();
        let tree = Arc::new(build_tree(&snapshot));
        *slot = Some(CachedTree {
            tree: tree.clone(),
            version: snapshot.version,
            built_at: Instant::now(),
        });
        tree
    }

    /// Drop the cached build
    pub fn invalidate(&self) {
        *self.slot.lock().unwrap() = None;
    }
}
