//! Error types and exit codes for chunkd
//!
//! Errors are split by blast radius. [`SetupError`] is process-fatal; the
//! connection-local kinds ([`ProtocolError`], [`TransferError`],
//! [`ResourceError`]) are folded into [`ConnectionError`], which the
//! dispatch loop turns into "release the transfer context and close".

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

use crate::server::ConnectionId;

/// Main error type for chunkd operations
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Convert error to an exit code:
    /// - 0: Success
    /// - 1: Socket or poll setup failure
    /// - 2: Invalid configuration
    /// - 3: Other IO error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Setup(_) => ExitCode::from(1),
            Self::Config { .. } => ExitCode::from(2),
            Self::Io(_) => ExitCode::from(3),
        }
    }
}

/// Socket, bind, listen and multiplexing failures. Always fatal.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("failed to configure listening socket: {0}")]
    Configure(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to create poller: {0}")]
    PollCreate(#[source] io::Error),

    #[error("polling failed: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to register listening socket: {0}")]
    Register(#[source] io::Error),

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("unexpected readiness on listening socket")]
    ListenerFault,
}

/// Malformed or unsupported client frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("unknown command 0x{0:02X}")]
    UnknownCommand(u8),

    #[error("filename is not valid UTF-8")]
    InvalidFilename,
}

/// Disk and socket failures while serving one connection.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("path of {len} bytes exceeds the {max} byte limit")]
    PathTooLong { len: usize, max: usize },

    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to seek: {0}")]
    Seek(#[source] io::Error),

    #[error("failed to read file: {0}")]
    Read(#[source] io::Error),

    #[error("failed to send: {0}")]
    Send(#[source] io::Error),

    #[error("failed to receive: {0}")]
    Receive(#[source] io::Error),

    #[error("failed to update readiness interest: {0}")]
    Register(#[source] io::Error),
}

impl TransferError {
    /// Status byte to report before closing, if the client should get one.
    ///
    /// Only disk failures after the file was opened carry a status; open
    /// failures and socket failures close silently.
    pub fn status_code(&self) -> Option<u8> {
        const EIO: i32 = 5;
        match self {
            Self::Seek(e) | Self::Read(e) => {
                let code = e.raw_os_error().unwrap_or(EIO).clamp(1, 255);
                u8::try_from(code).ok()
            }
            _ => None,
        }
    }
}

/// Bounded-pool exhaustion and transfer table rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("no free connection slot")]
    NoFreeSlot,

    #[error("no free transfer slot")]
    NoFreeTransfer,

    #[error("connection {0} already has a transfer in flight")]
    DuplicateTransfer(ConnectionId),

    #[error("transfer requested with an empty filename")]
    EmptyFilename,
}

/// Anything that ends one connection without affecting the others.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("peer reported a socket error or hangup")]
    Hangup,

    #[error("connection idle for longer than the configured timeout")]
    IdleTimeout,
}

/// Result type alias for chunkd operations
pub type Result<T> = std::result::Result<T, Error>;
