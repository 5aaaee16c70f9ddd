//! Per-node request bookkeeping.
//!
//! `RequestRecord` deduplicates discoveries, `PositiveRecord` remembers who
//! answered FOUND first so STREAM and TEARDOWN can retrace the same path.

use std::net::SocketAddr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("positive record for request {0} is already set")]
    AlreadySet(Uuid),
}

/// Requests this node has seen.
#[derive(Debug, Default)]
pub struct RequestRecord {
    handled: DashMap<Uuid, bool>,
}

impl RequestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` handled. Returns true only for the first caller.
    pub fn try_mark(&self, id: Uuid) -> bool {
        match self.handled.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(true);
                true
            }
        }
    }

    pub fn is_handled(&self, id: &Uuid) -> bool {
        self.handled.get(id).map(|v| *v).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.handled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handled.is_empty()
    }
}

/// First positive answer per request. Set once, never overwritten.
#[derive(Debug, Default)]
pub struct PositiveRecord {
    sources: DashMap<Uuid, SocketAddr>,
}

impl PositiveRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: Uuid, source: SocketAddr) -> Result<(), RecordError> {
        match self.sources.entry(id) {
            Entry::Occupied(_) => Err(RecordError::AlreadySet(id)),
            Entry::Vacant(slot) => {
                slot.insert(source);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SocketAddr> {
        self.sources.get(id).map(|s| *s)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
