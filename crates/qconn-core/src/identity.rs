//! Peer identity handles.
//!
//! Certificate validation happens in the transport binding. What reaches this
//! layer is an already-verified identity: a shared handle the binding gives
//! up exactly once, at handshake completion. The connection holds it until
//! dispose and then drops its reference. A caller that obtained a clone
//! through [`Connection::remote_identity`](crate::Connection::remote_identity)
//! keeps the identity alive on its own and is responsible for dropping it.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;

struct IdentityData {
    subject: String,
    der: Bytes,
}

/// Verified identity of the remote endpoint.
#[derive(Clone)]
pub struct PeerIdentity {
    inner: Arc<IdentityData>,
}

impl PeerIdentity {
    /// Create an identity from a subject name and its DER encoding.
    pub fn new(subject: impl Into<String>, der: Bytes) -> Self {
        Self {
            inner: Arc::new(IdentityData {
                subject: subject.into(),
                der,
            }),
        }
    }

    /// Subject name presented by the peer.
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    /// Raw DER encoding of the peer certificate.
    pub fn der(&self) -> &Bytes {
        &self.inner.der
    }

    /// Create a non-owning probe that reports when the identity is released.
    pub fn downgrade(&self) -> IdentityProbe {
        IdentityProbe {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PeerIdentity {}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("subject", &self.inner.subject)
            .field("der_len", &self.inner.der.len())
            .finish()
    }
}

/// Non-owning view of a [`PeerIdentity`].
#[derive(Debug, Clone)]
pub struct IdentityProbe {
    inner: Weak<IdentityData>,
}

impl IdentityProbe {
    /// Returns true once every owning handle has been dropped.
    pub fn is_released(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl fmt::Debug for IdentityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_accessors() {
        let id = PeerIdentity::new("CN=server", Bytes::from_static(&[0x30, 0x82]));
        assert_eq!(id.subject(), "CN=server");
        assert_eq!(id.der().as_ref(), &[0x30, 0x82]);
    }

    #[test]
    fn clones_are_equal_distinct_identities_are_not() {
        let a = PeerIdentity::new("CN=a", Bytes::new());
        let b = PeerIdentity::new("CN=a", Bytes::new());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn probe_tracks_release() {
        let id = PeerIdentity::new("CN=peer", Bytes::new());
        let probe = id.downgrade();
        let retained = id.clone();

        drop(id);
        assert!(!probe.is_released());

        drop(retained);
        assert!(probe.is_released());
    }
}
