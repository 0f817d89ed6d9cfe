//! Signature-backed login token
//!
//! `{v: 1, publicKey, timestamp, signature}` where the signature is schnorr
//! over `SHA256(utf8(public_key_hex ‖ decimal(timestamp_ms)))`. A token is
//! a session while it is younger than the validity window and the signature
//! verifies; any failed check means no session.

use std::time::Duration;

use secp256k1::schnorr::Signature;
use secp256k1::{Message, Secp256k1, Verification, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use syncmap_core::sha256;

/// How long an issued token stays valid
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Persisted login token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginToken {
    pub v: u8,
    /// x-only public key, lowercase hex
    #[serde(rename = "publicKey")]
    pub public_key: String,
    /// Issue time, epoch milliseconds
    pub timestamp: u64,
    /// hex schnorr64 over the signing payload
    pub signature: String,
}

impl LoginToken {
    /// The signed byte string: public key hex concatenated with the decimal
    /// millisecond timestamp
    pub fn signing_payload(public_key: &str, timestamp_ms: u64) -> Vec<u8> {
        format!("{public_key}{timestamp_ms}").into_bytes()
    }

    /// Check version, age and signature. Returns false on any failure.
    pub fn verify<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        now_ms: u64,
        validity: Duration,
    ) -> bool {
        if self.v != 1 {
            return false;
        }
        if now_ms.saturating_sub(self.timestamp) > validity.as_millis() as u64 {
            return false;
        }
        let Ok(pubkey_bytes) = hex::decode(&self.public_key) else {
            return false;
        };
        let Ok(pubkey) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        let digest = sha256(&Self::signing_payload(&self.public_key, self.timestamp));
        let message = Message::from_digest(digest);
        secp.verify_schnorr(&signature, &message, &pubkey).is_ok()
    }
}

/// Compare byte strings without data-dependent early exit
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
