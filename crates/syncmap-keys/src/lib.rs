//! syncmap-keys - Credential import and login sessions
//!
//! Decodes Bech32 (npub, nsec) pairs, derives and checks the x-only public
//! key, and backs the session with a schnorr-signed, time-limited token.
//! Distinct errors surface for decode failures, mismatched pairs and bad
//! signatures; any token check failure is simply "no session".

pub mod manager;
pub mod token;

pub use manager::{KeyError, KeyManager, MemorySessionStore, Session, SessionStore};
pub use token::{LoginToken, TOKEN_VALIDITY};
