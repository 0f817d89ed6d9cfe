//! syncmap-engine - Progressive merkle sync between peers
//!
//! Nodes holding keyed sets of signed records converge by exchanging root
//! hashes, descending into differing subtrees one level at a time, and
//! finally requesting only the records they are missing. The engine owns
//! all per-peer state: sync flags, traffic counters, the record-request
//! batcher, and every armed timer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncmap_core::{AcceptAll, MemoryRecordStore};
//! use syncmap_engine::{RoomEvent, RoomTransport, SyncConfig, SyncEngine};
//! use tokio::sync::mpsc;
//!
//! # async fn demo(transport: Arc<dyn RoomTransport>, events: mpsc::UnboundedReceiver<RoomEvent>) {
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryRecordStore::new()),
//!     Arc::new(AcceptAll),
//!     transport,
//! );
//! engine.spawn(events);
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod ingest;
pub mod message;
pub mod peer;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{EngineError, SyncEngine};
pub use ingest::IngestOutcome;
pub use message::SyncMessage;
pub use peer::TrafficStats;
pub use transport::{PeerId, RoomEvent, RoomTransport, TransportError};
