//! Stream table for a connection.
//!
//! Holds the shared state of every live stream and allocates IDs for locally
//! opened ones. Peer-opened IDs are tracked per kind so a repeated or
//! wrongly-numbered open can be told apart from a fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use crate::stream::StreamShared;
use crate::transport::{Side, StreamId, StreamKind};

/// Result of registering a peer-opened stream ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteOpen {
    /// First time this ID is seen.
    New,
    /// The ID was announced before (still open or already released).
    Duplicate,
    /// The ID carries our initiator bit.
    WrongInitiator,
}

#[derive(Debug, Default, Clone, Copy)]
struct PerKind<T> {
    bidi: T,
    uni: T,
}

impl<T> PerKind<T> {
    fn get_mut(&mut self, kind: StreamKind) -> &mut T {
        match kind {
            StreamKind::Bidirectional => &mut self.bidi,
            StreamKind::Unidirectional => &mut self.uni,
        }
    }
}

/// Live streams of one connection.
#[derive(Debug)]
pub(crate) struct StreamTable {
    local: Side,
    streams: HashMap<StreamId, Arc<StreamShared>>,
    next_local: PerKind<u64>,
    /// Next expected index for peer-opened streams; lower indices were seen.
    next_remote: PerKind<u64>,
}

impl StreamTable {
    pub(crate) fn new(local: Side) -> Self {
        Self {
            local,
            streams: HashMap::new(),
            next_local: PerKind::default(),
            next_remote: PerKind::default(),
        }
    }

    /// Allocate the next locally initiated ID of `kind`.
    pub(crate) fn allocate(&mut self, kind: StreamKind) -> StreamId {
        let next = self.next_local.get_mut(kind);
        let id = StreamId::new(self.local, kind, *next);
        *next += 1;
        id
    }

    /// Check a peer-opened ID and record it as seen.
    ///
    /// Indices may skip ahead (the peer opened streams we have not been told
    /// about yet); anything at or below an index already seen is a duplicate.
    pub(crate) fn register_remote(&mut self, id: StreamId) -> RemoteOpen {
        if id.initiator() == self.local {
            return RemoteOpen::WrongInitiator;
        }
        let next = self.next_remote.get_mut(id.kind());
        if id.index() < *next {
            return RemoteOpen::Duplicate;
        }
        *next = id.index() + 1;
        RemoteOpen::New
    }

    pub(crate) fn insert(&mut self, stream: Arc<StreamShared>) {
        self.streams.insert(stream.id(), stream);
    }

    pub(crate) fn get(&self, id: StreamId) -> Option<&Arc<StreamShared>> {
        self.streams.get(&id)
    }

    pub(crate) fn remove(&mut self, id: StreamId) -> Option<Arc<StreamShared>> {
        self.streams.remove(&id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    /// Remove every stream, returning them.
    pub(crate) fn drain(&mut self) -> Vec<Arc<StreamShared>> {
        self.streams.drain().map(|(_, stream)| stream).collect()
    }
}
