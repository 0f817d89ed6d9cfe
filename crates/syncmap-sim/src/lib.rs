//! syncmap-sim - Simulation harness for the sync engine
//!
//! Runs real engines against an in-memory room so end-to-end reconciliation
//! can be tested deterministically on the paused tokio clock. The room logs
//! every send, which is what the scenario tests assert against.

pub mod node;
pub mod room;

pub use node::{init_tracing, make_record, make_records, SimNode};
pub use room::{Room, RoomMember, SentMessage};
