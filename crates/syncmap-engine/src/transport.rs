//! Room transport abstraction
//!
//! The engine talks to peers through a multi-peer room: join/leave
//! notifications plus typed, peer-addressed message delivery. Real
//! deployments back this with a WebRTC-style data channel mesh; tests and
//! simulations use an in-memory room.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::message::SyncMessage;

/// Identifies a peer within the room
pub type PeerId = String;

/// Errors from room transport operations
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("disconnected")]
    Disconnected,
}

/// Inbound room activity, delivered to the engine in arrival order
#[derive(Debug, Clone)]
pub enum RoomEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message { from: PeerId, message: SyncMessage },
}

/// Outbound half of the room
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Deliver a message to one peer, or broadcast when `to` is None
    async fn send(&self, message: SyncMessage, to: Option<&PeerId>) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: RoomTransport + ?Sized> RoomTransport for Arc<T> {
    async fn send(&self, message: SyncMessage, to: Option<&PeerId>) -> Result<(), TransportError> {
        (**self).send(message, to).await
    }
}
