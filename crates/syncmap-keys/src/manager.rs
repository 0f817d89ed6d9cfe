//! Credential import and session lifecycle
//!
//! `import` decodes an (npub, nsec) pair, derives the x-only public key
//! from the secret, compares it against the decoded public key in constant
//! time, and persists a schnorr-signed login token. `load` restores the
//! session while the token is valid; `logout` deletes it. Secret key bytes
//! are overwritten before import returns.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::{All, Keypair, Message, Secp256k1};
use zeroize::Zeroize;

use syncmap_core::sha256;

use crate::token::{constant_time_eq, LoginToken, TOKEN_VALIDITY};

/// Key manager error type
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// npub/nsec failed to decode
    #[error("invalid key encoding: {0}")]
    InvalidKey(String),
    /// the npub does not belong to the nsec
    #[error("public key does not match secret key")]
    KeyMismatch,
    /// token signature did not verify
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("session store error: {0}")]
    Store(String),
}

/// Where the login token lives. One slot; the engine's durable store backs
/// this with its `session` table.
pub trait SessionStore: Send + Sync {
    fn put_token(&self, token: &LoginToken) -> Result<(), KeyError>;
    fn get_token(&self) -> Result<Option<LoginToken>, KeyError>;
    fn delete_token(&self) -> Result<(), KeyError>;
}

/// In-memory session slot for tests
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    token: Mutex<Option<LoginToken>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn put_token(&self, token: &LoginToken) -> Result<(), KeyError> {
        *self.token.lock().unwrap() = Some(token.clone());
        Ok(())
    }

    fn get_token(&self) -> Result<Option<LoginToken>, KeyError> {
        Ok(self.token.lock().unwrap().clone())
    }

    fn delete_token(&self) -> Result<(), KeyError> {
        *self.token.lock().unwrap() = None;
        Ok(())
    }
}

/// A restored login session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// x-only public key, lowercase hex
    pub public_key: String,
}

/// Credential import and session restore
pub struct KeyManager<S: SessionStore> {
    store: S,
    secp: Secp256k1<All>,
}

impl<S: SessionStore> KeyManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            secp: Secp256k1::new(),
        }
    }

    /// Import a credential pair and persist a signed login token
    pub fn import(&self, npub: &str, nsec: &str) -> Result<Session, KeyError> {
        self.import_at(npub, nsec, now_ms())
    }

    pub fn import_at(&self, npub: &str, nsec: &str, now_ms: u64) -> Result<Session, KeyError> {
        let secret = nostr::SecretKey::parse(nsec)
            .map_err(|e| KeyError::InvalidKey(format!("nsec: {e}")))?;
        let public = nostr::PublicKey::parse(npub)
            .map_err(|e| KeyError::InvalidKey(format!("npub: {e}")))?;
        let claimed = hex::decode(public.to_hex())
            .map_err(|e| KeyError::InvalidKey(format!("npub: {e}")))?;

        let mut secret_bytes = secret.to_secret_bytes();
        let keypair = match Keypair::from_seckey_slice(&self.secp, &secret_bytes) {
            Ok(keypair) => keypair,
            Err(e) => {
                secret_bytes.zeroize();
                return Err(KeyError::InvalidKey(format!("nsec: {e}")));
            }
        };
        let derived = keypair.x_only_public_key().0.serialize();
        if !constant_time_eq(&derived, &claimed) {
            secret_bytes.zeroize();
            return Err(KeyError::KeyMismatch);
        }

        let public_hex = hex::encode(derived);
        let digest = sha256(&LoginToken::signing_payload(&public_hex, now_ms));
        let signature = self.secp.sign_schnorr(&Message::from_digest(digest), &keypair);
        secret_bytes.zeroize();

        let token = LoginToken {
            v: 1,
            public_key: public_hex.clone(),
            timestamp: now_ms,
            signature: hex::encode(signature.serialize()),
        };
        self.store.put_token(&token)?;

        Ok(Session {
            public_key: public_hex,
        })
    }

    /// Restore the session if a valid token is persisted
    pub fn load(&self) -> Result<Option<Session>, KeyError> {
        self.load_at(now_ms())
    }

    pub fn load_at(&self, now_ms: u64) -> Result<Option<Session>, KeyError> {
        let Some(token) = self.store.get_token()? else {
            return Ok(None);
        };
        if !token.verify(&self.secp, now_ms, TOKEN_VALIDITY) {
            return Ok(None);
        }
        Ok(Some(Session {
            public_key: token.public_key,
        }))
    }

    /// Delete the persisted token. The manager keeps no secret material.
    pub fn logout(&self) -> Result<(), KeyError> {
        self.store.delete_token()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
