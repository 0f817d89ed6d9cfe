//! Shared primitive types
//!
//! Core principle: records are keyed by uuid string, content is addressed
//! by the SHA256 of its canonical serialization.

/// 32-byte SHA256 content hash
pub type Hash = [u8; 32];

/// Record identifier (128-bit uuid, string form)
pub type RecordId = String;

/// Convert hash to lowercase hex string
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Convert hex string to hash
pub fn from_hex(hex_str: &str) -> Result<Hash, hex::FromHexError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(hash)
}
