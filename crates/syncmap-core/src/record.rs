//! Signed record model
//!
//! Wire and at-rest JSON schema:
//!
//! ```json
//! { "uuid": "...", "created_at": 1700000000000, "bucket": "...",
//!   "author":    { "npub": "<hex x-only pub>" },
//!   "content":   { "text": "...", "link": null },
//!   "geo":       { "latitude": 60.17, "longitude": 24.94 },
//!   "integrity": { "hash": "<hex sha256>", "signature": "<hex schnorr64>" } }
//! ```
//!
//! `integrity.hash` is the SHA256 of the canonical serialization: the record
//! JSON without the `integrity` field, fields in declared order.

use serde::{Deserialize, Serialize};

use crate::hash::sha256_hex;

/// Record author identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// x-only public key, lowercase hex
    pub npub: String,
}

/// Record payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub text: String,
    /// Nullable; serialized as `null` when absent so the canonical form is stable
    pub link: Option<String>,
}

/// Geographic position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    pub latitude: f64,
    pub longitude: f64,
}

/// Content hash and author signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integrity {
    /// hex SHA256 of the canonical serialization
    pub hash: String,
    /// hex-encoded 64-byte schnorr signature over the hash
    pub signature: String,
}

/// A signed, hashed unit of data, keyed by uuid. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub uuid: String,
    /// Creation time, epoch milliseconds
    pub created_at: u64,
    /// Opaque grouping tag
    pub bucket: String,
    pub author: Author,
    pub content: Content,
    pub geo: Geo,
    pub integrity: Integrity,
}

/// Canonical view: every field except `integrity`, in declared order.
/// serde_json preserves struct field order, so serializing this is exactly
/// the canonical byte string.
#[derive(Serialize)]
struct CanonicalRecord<'a> {
    uuid: &'a str,
    created_at: u64,
    bucket: &'a str,
    author: &'a Author,
    content: &'a Content,
    geo: &'a Geo,
}

impl Record {
    /// Build a record with its content hash computed. The signature starts
    /// empty; callers that sign do so over the returned `integrity.hash`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uuid: impl Into<String>,
        created_at: u64,
        bucket: impl Into<String>,
        npub: impl Into<String>,
        text: impl Into<String>,
        link: Option<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        let mut record = Self {
            uuid: uuid.into(),
            created_at,
            bucket: bucket.into(),
            author: Author { npub: npub.into() },
            content: Content {
                text: text.into(),
                link,
            },
            geo: Geo {
                latitude,
                longitude,
            },
            integrity: Integrity {
                hash: String::new(),
                signature: String::new(),
            },
        };
        record.integrity.hash = record.content_hash();
        record
    }

    /// Attach a signature (hex schnorr64)
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.integrity.signature = signature.into();
        self
    }

    /// SHA256 of the canonical serialization, lowercase hex
    pub fn content_hash(&self) -> String {
        let canonical = CanonicalRecord {
            uuid: &self.uuid,
            created_at: self.created_at,
            bucket: &self.bucket,
            author: &self.author,
            content: &self.content,
            geo: &self.geo,
        };
        let bytes =
            serde_json::to_vec(&canonical).expect("canonical record serialization cannot fail");
        sha256_hex(&bytes)
    }

    /// Check that `integrity.hash` matches the canonical serialization
    pub fn verify_hash(&self) -> bool {
        self.integrity.hash == self.content_hash()
    }
}
