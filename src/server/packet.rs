//! Packet codec
//!
//! Fixed-layout framing: `[cmd:1][length:1][payload:length][trailer:1]`.
//! The trailer is reserved for a checksum and is neither produced with a
//! meaningful value nor validated. One receive is assumed to hold exactly
//! one frame; there is no reassembly across reads.

use crate::error::ProtocolError;

/// Command byte plus length byte
pub const HEADER_SIZE: usize = 2;

/// Largest payload a frame can carry
pub const PAYLOAD_CAPACITY: usize = 32;

/// Reserved trailer byte
pub const TRAILER_SIZE: usize = 1;

/// Largest frame the server will read in one receive
pub const FRAME_MAX_SIZE: usize = HEADER_SIZE + PAYLOAD_CAPACITY + TRAILER_SIZE;

/// Longest filename accepted in a download request
pub const FILENAME_MAX: usize = PAYLOAD_CAPACITY;

/// Commands understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    DownloadFile = 0x01,
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::DownloadFile),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// A decoded frame borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub command: u8,
    /// Length as declared by the client, before any capping
    pub declared_length: u8,
    /// Payload bytes actually present, capped at [`PAYLOAD_CAPACITY`]
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Decode one frame from the bytes of a single receive.
    ///
    /// A declared length larger than the bytes present or than the payload
    /// capacity is not an error; the payload is simply cut short.
    pub fn decode(raw: &'a [u8]) -> Result<Self, ProtocolError> {
        if raw.len() < HEADER_SIZE {
            return Err(ProtocolError::FrameTooShort { len: raw.len() });
        }

        let command = raw[0];
        let declared_length = raw[1];
        let body = &raw[HEADER_SIZE..];
        let len = usize::from(declared_length)
            .min(PAYLOAD_CAPACITY)
            .min(body.len());

        Ok(Self {
            command,
            declared_length,
            payload: &body[..len],
        })
    }
}

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Download { filename: String },
}

impl Request {
    /// Interpret a decoded frame.
    ///
    /// The filename is cut at the first NUL and truncated to
    /// [`FILENAME_MAX`] bytes. An empty name is returned as-is; the
    /// transfer table is what rejects it.
    pub fn parse(frame: &Frame<'_>) -> Result<Self, ProtocolError> {
        match Command::try_from(frame.command)? {
            Command::DownloadFile => {
                let name = frame.payload.split(|&b| b == 0).next().unwrap_or_default();
                let name = &name[..name.len().min(FILENAME_MAX)];
                let filename = std::str::from_utf8(name)
                    .map_err(|_| ProtocolError::InvalidFilename)?
                    .to_string();
                Ok(Self::Download { filename })
            }
        }
    }

    /// Encode as a wire frame. Filenames longer than the payload capacity
    /// are truncated, matching what the server would keep anyway.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Download { filename } => {
                let name = &filename.as_bytes()[..filename.len().min(PAYLOAD_CAPACITY)];
                let mut frame = Vec::with_capacity(HEADER_SIZE + name.len() + TRAILER_SIZE);
                frame.push(Command::DownloadFile as u8);
                // PAYLOAD_CAPACITY < 256, so the length always fits.
                frame.push(name.len() as u8);
                frame.extend_from_slice(name);
                frame.push(0);
                frame
            }
        }
    }
}
