//! Transfer contexts and the bounded table that holds them.

use std::fs::File;

use tracing::{debug, warn};

use crate::error::ResourceError;
use crate::server::ConnectionId;

/// In-flight download state for one connection.
#[derive(Debug)]
pub struct TransferContext {
    pub id: ConnectionId,
    pub filename: String,
    /// Opened lazily by the engine on the first chunk
    pub file: Option<File>,
    /// Bytes the client has actually been sent
    pub transferred_total: u64,
}

impl TransferContext {
    pub fn new(id: ConnectionId, filename: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            file: None,
            transferred_total: 0,
        }
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            id: self.id,
            filename: self.filename.clone(),
            transferred_total: self.transferred_total,
            file_open: self.file.is_some(),
        }
    }
}

/// Comparable view of a context, used for logging and table snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub id: ConnectionId,
    pub filename: String,
    pub transferred_total: u64,
    pub file_open: bool,
}

/// Fixed-capacity table of transfer contexts keyed by connection.
///
/// At most one live context exists per connection id.
#[derive(Debug)]
pub struct TransferTable {
    entries: Vec<Option<TransferContext>>,
}

impl TransferTable {
    pub fn new(capacity: usize) -> Self {
        let mut table = Self { entries: Vec::new() };
        table.reset(capacity);
        table
    }

    /// Drop every context (closing any open files) and resize to `capacity` empty entries.
    pub fn reset(&mut self, capacity: usize) {
        self.entries.clear();
        self.entries.resize_with(capacity, || None);
    }

    /// Insert `ctx` into the first free entry and return its index.
    pub fn add(&mut self, ctx: TransferContext) -> Result<usize, ResourceError> {
        if ctx.filename.is_empty() {
            return Err(ResourceError::EmptyFilename);
        }
        if self.contains(ctx.id) {
            return Err(ResourceError::DuplicateTransfer(ctx.id));
        }

        let index = self
            .entries
            .iter()
            .position(Option::is_none)
            .ok_or(ResourceError::NoFreeTransfer)?;
        debug!(conn = %ctx.id, index, filename = %ctx.filename, "transfer context added");
        self.entries[index] = Some(ctx);
        Ok(index)
    }

    /// Remove the context for `id`, if any.
    ///
    /// Removing an absent id leaves the table untouched and is logged as
    /// an anomaly: callers should only remove what they registered.
    pub fn remove(&mut self, id: ConnectionId) -> Option<TransferContext> {
        let mut removed = None;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.as_ref().is_some_and(|ctx| ctx.id == id) {
                debug!(conn = %id, index, "transfer context removed");
                removed = entry.take();
            }
        }
        if removed.is_none() {
            warn!(conn = %id, "no transfer context to remove");
        }
        removed
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut TransferContext> {
        self.entries.iter_mut().flatten().find(|ctx| ctx.id == id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.iter().flatten().any(|ctx| ctx.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Entry-by-entry view of the table, empty entries included.
    pub fn snapshot(&self) -> Vec<Option<TransferSummary>> {
        self.entries
            .iter()
            .map(|entry| entry.as_ref().map(TransferContext::summary))
            .collect()
    }
}
