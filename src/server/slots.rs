//! Bounded connection slot pool.
//!
//! Slot indices never leave the dispatch loop; everything else refers to
//! a connection by its [`ConnectionId`]. The reactor is edge-triggered, so
//! each slot caches the readiness it was last told about until an
//! operation on the socket reports would-block.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use mio::event::Event;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, ResourceError, TransferError};

/// Tokens below this value are reserved for the listener and the waker.
pub const FIRST_SLOT_TOKEN: usize = 2;

/// Identity of one accepted connection. Never reused within a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness reported by the reactor and not yet consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub priority: bool,
    /// Socket error, or both directions hung up
    pub failed: bool,
}

impl Readiness {
    fn merge(&mut self, event: &Event) {
        self.readable |= event.is_readable() || event.is_read_closed();
        self.writable |= event.is_writable();
        self.priority |= event.is_priority();
        self.failed |= event.is_error() || (event.is_read_closed() && event.is_write_closed());
    }
}

/// A live client connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub interest: Interest,
    pub readiness: Readiness,
    pub last_activity: Instant,
}

impl Connection {
    /// Cached readiness this connection is currently interested in.
    pub fn has_pending(&self) -> bool {
        self.readiness.failed
            || (self.readiness.readable && self.interest.is_readable())
            || (self.readiness.writable && self.interest.is_writable())
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Fixed-capacity pool of connection slots.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Option<Connection>>,
    next_id: u64,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        let mut table = Self {
            slots: Vec::new(),
            next_id: 1,
        };
        table.reset(capacity);
        table
    }

    /// Empty every slot. Streams still present are dropped, which closes them.
    pub fn reset(&mut self, capacity: usize) {
        self.slots.clear();
        self.slots.resize_with(capacity, || None);
    }

    pub fn token(index: usize) -> Token {
        Token(FIRST_SLOT_TOKEN + index)
    }

    /// Map a reactor token back to a slot index.
    pub fn index_of(&self, token: Token) -> Option<usize> {
        token
            .0
            .checked_sub(FIRST_SLOT_TOKEN)
            .filter(|&index| index < self.slots.len())
    }

    /// Place a freshly accepted stream in the first free slot, interested
    /// in readability. With no free slot the stream is dropped (closed).
    pub fn insert(
        &mut self,
        registry: &Registry,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<ConnectionId, ConnectionError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ResourceError::NoFreeSlot)?;

        registry
            .register(&mut stream, Self::token(index), Interest::READABLE)
            .map_err(TransferError::Register)?;

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        info!(conn = %id, slot = index, %peer, "accepted connection");

        self.slots[index] = Some(Connection {
            id,
            stream,
            peer,
            interest: Interest::READABLE,
            readiness: Readiness::default(),
            last_activity: Instant::now(),
        });
        Ok(id)
    }

    pub fn get(&self, index: usize) -> Option<&Connection> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Connection> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Record a reactor event for the slot owning `token`.
    ///
    /// Returns false when no live connection owns the token.
    pub fn record(&mut self, token: Token, event: &Event) -> bool {
        match self.index_of(token).and_then(|index| self.get_mut(index)) {
            Some(conn) => {
                conn.readiness.merge(event);
                true
            }
            None => false,
        }
    }

    /// Change the readiness interest of a slot.
    pub fn set_interest(
        &mut self,
        registry: &Registry,
        index: usize,
        interest: Interest,
    ) -> io::Result<()> {
        let Some(conn) = self.get_mut(index) else {
            return Err(io::ErrorKind::NotFound.into());
        };
        if conn.interest == interest {
            return Ok(());
        }
        registry.reregister(&mut conn.stream, Self::token(index), interest)?;
        conn.interest = interest;
        Ok(())
    }

    /// Deregister and close the connection in `index`.
    pub fn close(&mut self, registry: &Registry, index: usize) -> Option<Connection> {
        let mut conn = self.slots.get_mut(index)?.take()?;
        if let Err(e) = registry.deregister(&mut conn.stream) {
            warn!(conn = %conn.id, slot = index, "deregister failed: {}", e);
        }
        info!(conn = %conn.id, slot = index, peer = %conn.peer, "connection closed");
        Some(conn)
    }

    /// Close every live connection.
    pub fn close_all(&mut self, registry: &Registry) {
        for index in 0..self.slots.len() {
            self.close(registry, index);
        }
        debug!("all connections closed");
    }

    pub fn any_pending(&self) -> bool {
        self.slots.iter().flatten().any(Connection::has_pending)
    }

    /// Earliest `last_activity` among live connections.
    pub fn oldest_activity(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|c| c.last_activity).min()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
