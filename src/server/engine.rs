//! Transfer engine
//!
//! One call moves at most one chunk: seek to the confirmed offset, read up
//! to `chunk_size` bytes, send them, advance by what the socket accepted.
//! Once the file is exhausted a single status byte marks the end.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::debug;

use crate::config::ServerConfig;
use crate::error::TransferError;
use crate::server::socket::{self, WriteOutcome};
use crate::server::transfer::TransferContext;

/// Status byte sent after the last data chunk of a clean transfer
pub const STATUS_COMPLETE: u8 = 0;

/// What one engine invocation achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Data bytes accepted by the socket; more remain
    Sent(usize),
    /// The socket accepted nothing; offset unchanged
    WouldBlock,
    /// The terminal status byte went out. `sent` data bytes preceded it in this call.
    Done { sent: usize },
}

/// Reads files under a root directory and streams them in chunks.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    root: PathBuf,
    chunk_size: usize,
    max_path_len: usize,
}

impl TransferEngine {
    pub fn new(root: impl Into<PathBuf>, chunk_size: usize, max_path_len: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size,
            max_path_len,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.root.clone(), config.chunk_size, config.max_path_len)
    }

    /// Resolve `filename` against the root. No traversal checks are made.
    // TODO: confine resolved paths to `root` before exposing chunkd beyond a trusted network.
    fn resolve(&self, filename: &str) -> Result<PathBuf, TransferError> {
        let path = self.root.join(filename);
        let len = path.as_os_str().len();
        if len > self.max_path_len {
            return Err(TransferError::PathTooLong {
                len,
                max: self.max_path_len,
            });
        }
        Ok(path)
    }

    fn open(&self, filename: &str) -> Result<File, TransferError> {
        let path = self.resolve(filename)?;
        File::open(&path).map_err(|source| TransferError::Open { path, source })
    }

    /// Move one chunk of `ctx`'s file to `sink`.
    ///
    /// `transferred_total` only advances by bytes the sink accepted, so a
    /// would-block or short send is retried from the same offset on the
    /// next call. The file handle stays open in `ctx` until `Done`.
    pub fn transfer_chunk<W: Write>(
        &self,
        sink: &mut W,
        ctx: &mut TransferContext,
    ) -> Result<ChunkOutcome, TransferError> {
        let file = match ctx.file.take() {
            Some(file) => file,
            None => self.open(&ctx.filename)?,
        };
        let file = ctx.file.insert(file);

        file.seek(SeekFrom::Start(ctx.transferred_total))
            .map_err(TransferError::Seek)?;

        let mut buf = vec![0u8; self.chunk_size];
        let (read, eof) = read_chunk(file, &mut buf).map_err(TransferError::Read)?;

        let mut sent = 0;
        if read > 0 {
            match socket::write(sink, &buf[..read]).map_err(TransferError::Send)? {
                WriteOutcome::WouldBlock => return Ok(ChunkOutcome::WouldBlock),
                WriteOutcome::Sent(n) => sent = n,
            }
            ctx.transferred_total += sent as u64;
            debug!(conn = %ctx.id, sent, total = ctx.transferred_total, "chunk sent");

            if sent < read {
                debug!(conn = %ctx.id, unsent = read - sent, "partial send");
                return Ok(ChunkOutcome::Sent(sent));
            }
            if !eof {
                return Ok(ChunkOutcome::Sent(sent));
            }
        }

        // Nothing left on disk. If the status byte does not fit now, the next
        // call reads zero bytes at this offset and tries again.
        match socket::write(sink, &[STATUS_COMPLETE]).map_err(TransferError::Send)? {
            WriteOutcome::WouldBlock if sent > 0 => Ok(ChunkOutcome::Sent(sent)),
            WriteOutcome::WouldBlock => Ok(ChunkOutcome::WouldBlock),
            WriteOutcome::Sent(_) => {
                ctx.file = None;
                debug!(conn = %ctx.id, total = ctx.transferred_total, "end of transfer signalled");
                Ok(ChunkOutcome::Done { sent })
            }
        }
    }
}

/// Fill `buf` from `file`. Returns the byte count and whether end of file
/// was hit before the buffer filled; a full buffer never reports EOF.
fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<(usize, bool)> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => return Ok((filled, true)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok((filled, false))
}
