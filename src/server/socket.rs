//! Socket layer
//!
//! Thin non-blocking wrappers over listen/accept/recv/send. Nothing here
//! blocks: "would block" is always a tagged outcome, never an error and
//! never confused with an orderly close.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::{ConnectionError, SetupError};
use crate::server::ConnectionId;

/// Result of a single non-blocking receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n > 0` bytes were placed at the start of the buffer
    Data(usize),
    /// Nothing available right now; the connection is still open
    WouldBlock,
    /// The peer performed an orderly shutdown
    Closed,
}

/// Result of a single non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This many bytes were accepted by the kernel, possibly fewer than offered
    Sent(usize),
    /// The send buffer is full; retry on the next writable event
    WouldBlock,
}

/// Create a non-blocking TCP listener with address reuse enabled.
pub fn listen(addr: SocketAddr, backlog: i32) -> Result<TcpListener, SetupError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(SetupError::SocketCreate)?;
    socket
        .set_reuse_address(true)
        .map_err(SetupError::Configure)?;
    socket
        .set_nonblocking(true)
        .map_err(SetupError::Configure)?;
    socket
        .bind(&addr.into())
        .map_err(|source| SetupError::Bind { addr, source })?;
    socket.listen(backlog).map_err(SetupError::Listen)?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}

/// Drain every pending connection on `listener`.
///
/// Each accepted stream is already non-blocking and is handed to
/// `register`. A registration failure drops (closes) that one stream and
/// draining continues. Returns the number of connections registered.
pub fn accept_all<F>(listener: &TcpListener, mut register: F) -> Result<usize, SetupError>
where
    F: FnMut(TcpStream, SocketAddr) -> Result<ConnectionId, ConnectionError>,
{
    let mut registered = 0;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => match register(stream, peer) {
                Ok(_) => registered += 1,
                Err(e) => warn!(%peer, "rejected connection: {}", e),
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            // The peer gave up before we got to it; nothing to clean up.
            Err(e) if matches!(e.kind(), ErrorKind::ConnectionAborted | ErrorKind::Interrupted) => {
                debug!("transient accept error: {}", e);
            }
            Err(e) => return Err(SetupError::Accept(e)),
        }
    }
    Ok(registered)
}

/// One non-blocking receive into `buf`.
pub fn read<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<ReadOutcome> {
    loop {
        match source.read(buf) {
            Ok(0) if !buf.is_empty() => return Ok(ReadOutcome::Closed),
            Ok(n) => return Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// What [`discard_pending`] threw away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Discarded {
    pub bytes: usize,
    /// The peer closed its side while draining
    pub closed: bool,
}

/// Read and drop everything queued on `source` until it would block.
///
/// Frames never span receives, so whatever follows a frame in the same
/// receive is not part of any request.
pub fn discard_pending<R: Read>(source: &mut R) -> io::Result<Discarded> {
    let mut scratch = [0u8; 256];
    let mut discarded = Discarded::default();
    loop {
        match read(source, &mut scratch)? {
            ReadOutcome::Data(n) => discarded.bytes += n,
            ReadOutcome::WouldBlock => return Ok(discarded),
            ReadOutcome::Closed => {
                discarded.closed = true;
                return Ok(discarded);
            }
        }
    }
}

/// One non-blocking send of up to `buf.len()` bytes.
pub fn write<W: Write>(sink: &mut W, buf: &[u8]) -> io::Result<WriteOutcome> {
    loop {
        match sink.write(buf) {
            Ok(0) if !buf.is_empty() => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => return Ok(WriteOutcome::Sent(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(WriteOutcome::WouldBlock),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
