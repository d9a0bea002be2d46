//! chunkd: a single-threaded chunked file download server
//!
//! Clients send a one-frame `DOWNLOAD_FILE` request naming a file under
//! the configured root; the server streams the file back in fixed-size
//! chunks, one chunk per writable event, and finishes with a single
//! status byte. A fixed pool of connection slots is multiplexed on one
//! thread with `mio`.
//!
//! # Example
//!
//! ```ignore
//! use chunkd::{Server, ServerConfig};
//!
//! let config = ServerConfig {
//!     root: "/srv/files".into(),
//!     ..ServerConfig::default()
//! };
//! let mut server = Server::bind(config)?;
//! println!("listening on {:?}", server.local_addr());
//! server.run()?;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod server;

// Re-export commonly used types
pub use cli::Cli;
pub use config::ServerConfig;
pub use error::{
    ConnectionError, Error, ProtocolError, ResourceError, Result, SetupError, TransferError,
};
pub use server::{
    ChunkOutcome, ConnectionId, Request, Server, ServerHandle, ServerState, TransferEngine,
    STATUS_COMPLETE,
};
