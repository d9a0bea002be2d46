//! chunkd download server
//!
//! A single-threaded, readiness-driven TCP server that streams files to
//! clients in small chunks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Server (dispatch loop)                          │
//! │                                                                      │
//! │  listener ──► accept_all ──► SlotTable  [slot 0][slot 1][slot 2]     │
//! │                                  │                                   │
//! │             readable ──► Frame::decode ──► TransferTable::add        │
//! │             writable ──► TransferEngine::transfer_chunk              │
//! │             error / hangup / idle ──► release + close                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one thread touches the slot pool, the transfer table and the
//! sockets. The only place it waits is `Poll::poll`.
//!
//! # Protocol
//!
//! Client to server, one frame per receive:
//!
//! ```text
//! [cmd:1][length:1][payload:length][trailer:1]
//!  0x01   n         filename bytes  reserved
//! ```
//!
//! Server to client: the raw file bytes, then one status byte
//! (`0` = complete). The connection stays open for the next request.
//!
//! # Modules
//!
//! - `socket` - non-blocking listen/accept/read/write
//! - `packet` - frame codec
//! - `transfer` - per-connection transfer contexts
//! - `engine` - one-chunk-per-call file streaming
//! - `slots` - bounded connection pool
//! - `dispatch` - the state machine tying it together

pub mod dispatch;
pub mod engine;
pub mod packet;
pub mod slots;
pub mod socket;
pub mod transfer;

pub use dispatch::{Server, ServerHandle, ServerState};
pub use engine::{ChunkOutcome, TransferEngine, STATUS_COMPLETE};
pub use packet::{Command, Frame, Request, FILENAME_MAX, FRAME_MAX_SIZE};
pub use slots::{ConnectionId, SlotTable};
pub use socket::{Discarded, ReadOutcome, WriteOutcome};
pub use transfer::{TransferContext, TransferSummary, TransferTable};
