//! syncmap-core - Record model, hash index and merkle tree
//!
//! The data layer of a peer-to-peer record synchronization engine: signed
//! records keyed by uuid, an in-memory index mapping each uuid to its
//! content hash, and a deterministic merkle tree built over that index.
//! Two nodes holding the same record set compute byte-identical root
//! hashes; differing sets expose their differences through progressive
//! subtree comparison.
//!
//! # Overview
//!
//! - **Records**: signed, hashed units of data addressed by uuid
//! - **Hash index**: `uuid -> content hash`, the leaf set of the tree
//! - **Merkle tree**: sorted-leaf binary tree; internal hashes cover the
//!   concatenated child hashes, odd leaves are promoted unchanged
//! - **Stores**: keyed record persistence behind a narrow async trait
//!
//! # Example
//!
//! ```rust
//! use syncmap_core::{build_tree, HashIndex, Record};
//!
//! let index = HashIndex::new();
//! let record = Record::new(
//!     "550e8400-e29b-41d4-a716-446655440000",
//!     1_700_000_000_000,
//!     "general",
//!     "ee11a5dff40c19a555f41fe42b48f00e618c91225622ae37b6c2bb67b76c4e49",
//!     "hello",
//!     None,
//!     60.1699,
//!     24.9384,
//! );
//! index.upsert(vec![(
//!     record.uuid.clone(),
//!     syncmap_core::from_hex(&record.integrity.hash).unwrap(),
//! )]);
//!
//! let tree = build_tree(&index.snapshot());
//! assert_eq!(tree.uuids.len(), 1);
//! ```

pub mod hash;
pub mod index;
pub mod merkle;
pub mod moderation;
pub mod record;
pub mod store;
pub mod types;

pub use hash::{empty_digest, sha256, sha256_hex};
pub use index::{HashIndex, IndexSnapshot, IndexUpdate};
pub use merkle::{
    build_tree, empty_root, MerkleNode, SubtreeSummary, TreeCache, PATH_LEFT, PATH_RIGHT,
};
pub use moderation::{AcceptAll, DenyList, Moderator};
pub use record::{Author, Content, Geo, Integrity, Record};
pub use store::{MemoryRecordStore, RecordStore, StoreError};
pub use types::{from_hex, to_hex, Hash, RecordId};
