//! Hashing utilities using SHA256

use crate::types::Hash;
use sha2::{Digest, Sha256};

/// Compute SHA256 hash of data
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// SHA256 as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    crate::types::to_hex(&sha256(data))
}

/// Digest of the empty byte string. Root hash of a tree with no records.
pub fn empty_digest() -> Hash {
    sha256(&[])
}
