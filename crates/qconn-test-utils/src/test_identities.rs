//! Fixed peer identities for deterministic testing.
//!
//! The mock network hands these to each side at handshake completion. Every
//! call builds a fresh identity so tests can track when a particular one is
//! released.

use bytes::Bytes;
use qconn_core::identity::PeerIdentity;

/// Test identities.
pub struct TestIdentities;

impl TestIdentities {
    /// Subject presented by mock listeners.
    pub const SERVER_SUBJECT: &'static str = "CN=localhost";

    /// Subject presented by mock clients.
    pub const CLIENT_SUBJECT: &'static str = "CN=qconn-test-client";

    /// Fixed DER stand-in for the server certificate.
    pub const SERVER_DER: [u8; 32] = [0x11; 32];

    /// Fixed DER stand-in for the client certificate.
    pub const CLIENT_DER: [u8; 32] = [0x22; 32];

    /// A fresh server identity.
    pub fn server() -> PeerIdentity {
        PeerIdentity::new(Self::SERVER_SUBJECT, Bytes::from_static(&Self::SERVER_DER))
    }

    /// A fresh client identity.
    pub fn client() -> PeerIdentity {
        PeerIdentity::new(Self::CLIENT_SUBJECT, Bytes::from_static(&Self::CLIENT_DER))
    }

    /// A deterministic identity derived from a seed.
    pub fn from_seed(seed: u8) -> PeerIdentity {
        PeerIdentity::new(format!("CN=peer-{seed}"), Bytes::from(vec![seed; 32]))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_identities() {
        let server = TestIdentities::server();
        assert_eq!(server.subject(), TestIdentities::SERVER_SUBJECT);
        assert_eq!(server.der().as_ref(), &TestIdentities::SERVER_DER);

        let client = TestIdentities::client();
        assert_eq!(client.subject(), TestIdentities::CLIENT_SUBJECT);
        assert_ne!(TestIdentities::SERVER_DER, TestIdentities::CLIENT_DER);
    }

    #[test]
    fn each_call_is_a_distinct_identity() {
        let a = TestIdentities::server();
        let b = TestIdentities::server();
        // Same content, separately owned
        assert_eq!(a.der(), b.der());
        assert_ne!(a, b);

        let probe = a.downgrade();
        drop(a);
        assert!(probe.is_released());
    }

    #[test]
    fn seeded_identities() {
        let a = TestIdentities::from_seed(0x42);
        let b = TestIdentities::from_seed(0x42);
        let c = TestIdentities::from_seed(0x43);

        assert_eq!(a.der(), b.der());
        assert_ne!(a.der(), c.der());
        assert_eq!(a.subject(), "CN=peer-66");
    }
}
