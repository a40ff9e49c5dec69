//! Stream identifiers and the properties encoded in them.

use std::fmt;

/// Which end of the connection an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The endpoint that called connect.
    Client,
    /// The endpoint that accepted through a listener.
    Server,
}


/// Whether a stream carries data both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Both endpoints can read and write.
    Bidirectional,
    /// Only the initiator writes.
    Unidirectional,
}

/// Whether a stream was opened here or by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamDirection {
    /// Opened by the peer and accepted here.
    Inbound,
    /// Opened here.
    Outbound,
}

/// QUIC-style stream identifier.
///
/// ```text
/// 0, 4, 8, ...   client-initiated bidirectional
/// 1, 5, 9, ...   server-initiated bidirectional
/// 2, 6, 10, ...  client-initiated unidirectional
/// 3, 7, 11, ...  server-initiated unidirectional
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    const INITIATOR_BIT: u64 = 0x1;
    const UNI_BIT: u64 = 0x2;

    /// Build the `index`-th stream ID for `initiator` and `kind`.
    pub fn new(initiator: Side, kind: StreamKind, index: u64) -> Self {
        let mut id = index << 2;
        if initiator == Side::Server {
            id |= Self::INITIATOR_BIT;
        }
        if kind == StreamKind::Unidirectional {
            id |= Self::UNI_BIT;
        }
        Self(id)
    }

    /// Raw wire value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Which side opened this stream.
    pub fn initiator(self) -> Side {
        if self.0 & Self::INITIATOR_BIT == 0 {
            Side::Client
        } else {
            Side::Server
        }
    }

    /// Bidirectional or unidirectional.
    pub fn kind(self) -> StreamKind {
        if self.0 & Self::UNI_BIT == 0 {
            StreamKind::Bidirectional
        } else {
            StreamKind::Unidirectional
        }
    }

    /// Sequence number among streams of the same initiator and kind.
    pub fn index(self) -> u64 {
        self.0 >> 2
    }

    /// Direction of this stream as seen from `local`.
    pub fn direction_for(self, local: Side) -> StreamDirection {
        if self.initiator() == local {
            StreamDirection::Outbound
        } else {
            StreamDirection::Inbound
        }
    }

    /// Whether `local` may write on this stream.
    pub fn can_send(self, local: Side) -> bool {
        self.kind() == StreamKind::Bidirectional || self.initiator() == local
    }

    /// Whether `local` may read from this stream.
    pub fn can_recv(self, local: Side) -> bool {
        self.kind() == StreamKind::Bidirectional || self.initiator() != local
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
