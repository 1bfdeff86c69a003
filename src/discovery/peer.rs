//! The data model shared by every discovery provider (spec §3): `PeerID`,
//! `PeerGroupID`, and `Peer`. Grounded in
//! `original_source/C/Cpp_include/c4PeerDiscovery.hh` for the shape of a
//! provider-agnostic peer record, re-expressed without the C4 ref-counting
//! machinery.
use std::collections::HashMap;
use std::time::Instant;

use uuid::Uuid;

/// Namespace UUIDs the type-5 `PeerID` is derived under (spec §6).
pub const DNSSD_PEER_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0xa1, 0xf0, 0xf0, 0x6f, 0xf4, 0x9a, 0x4d, 0x9a, 0xa0, 0x8b, 0x3b, 0x90, 0x1f, 0x4a, 0xcd, 0x49,
]);

/// A 16-byte opaque device identifier, normally a type-5 UUID derived from a
/// certificate's DER bytes plus [`DNSSD_PEER_ID_NAMESPACE`]. Equality and
/// hashing are byte-wise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerID(pub [u8; 16]);

impl PeerID {
    /// Derives the type-5 UUID from a peer's X.509 DER certificate bytes.
    pub fn from_certificate_der(der: &[u8]) -> Self {
        PeerID(*Uuid::new_v5(&DNSSD_PEER_ID_NAMESPACE, der).as_bytes())
    }

    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.0)
    }
}

/// Derives a stable `PeerID` for a provider-local peer that hasn't connected
/// yet, so discovery has a consistent key before a real certificate-derived
/// id is known (spec §6). Stable across re-discovery of the same
/// advertisement; superseded once the sync layer learns the real id.
pub(crate) fn provisional_peer_id(provider: &str, local_id: &str) -> PeerID {
    let key = format!("{provider}\0{local_id}");
    PeerID(*Uuid::new_v5(&DNSSD_PEER_ID_NAMESPACE, key.as_bytes()).as_bytes())
}

impl std::fmt::Display for PeerID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_uuid())
    }
}

/// An application-chosen string namespacing the discovery domain. Must be
/// 1..=63 bytes and must not contain `.`, `,`, or `\`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerGroupID(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PeerGroupIdError {
    #[error("peer group id must be 1..=63 bytes")]
    BadLength,
    #[error("peer group id must not contain '.', ',' or '\\\\'")]
    ReservedCharacter,
}

impl PeerGroupID {
    pub fn new(s: impl Into<String>) -> Result<Self, PeerGroupIdError> {
        let s = s.into();
        if s.is_empty() || s.len() > 63 {
            return Err(PeerGroupIdError::BadLength);
        }
        if s.contains(['.', ',', '\\']) {
            return Err(PeerGroupIdError::ReservedCharacter);
        }
        Ok(PeerGroupID(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An entry in a single provider's discovery set. `online` is true from
/// creation until removal and never flips back — a re-appearing device is a
/// new `Peer` (spec §3).
#[derive(Debug, Clone)]
pub struct Peer {
    pub provider: String,
    pub id: String,
    pub online: bool,
    pub connectable: bool,
    pub metadata: HashMap<String, Vec<u8>>,
    pub last_connection_attempt: Option<Instant>,
    pub last_connection_error: Option<String>,
}

impl Peer {
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Peer {
            provider: provider.into(),
            id: id.into(),
            online: true,
            connectable: false,
            metadata: HashMap::new(),
            last_connection_attempt: None,
            last_connection_error: None,
        }
    }

    /// Marks the peer as removed. Per the online-never-flips-back invariant,
    /// this is a one-way transition.
    pub fn mark_offline(&mut self) {
        self.online = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peer_id_is_deterministic_for_the_same_certificate() {
        let der = b"fake-certificate-bytes";
        let a = PeerID::from_certificate_der(der);
        let b = PeerID::from_certificate_der(der);
        assert_eq!(a, b);
    }

    #[test]
    fn peer_id_differs_for_different_certificates() {
        let a = PeerID::from_certificate_der(b"cert-one");
        let b = PeerID::from_certificate_der(b"cert-two");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_overlong_and_reserved_group_ids() {
        assert_eq!(PeerGroupID::new("x".repeat(64)), Err(PeerGroupIdError::BadLength));
        assert_eq!(PeerGroupID::new("a.b"), Err(PeerGroupIdError::ReservedCharacter));
        assert_eq!(PeerGroupID::new("a,b"), Err(PeerGroupIdError::ReservedCharacter));
        assert_eq!(PeerGroupID::new("a\\b"), Err(PeerGroupIdError::ReservedCharacter));
        assert!(PeerGroupID::new("myapp").is_ok());
    }

    #[test]
    fn offline_peer_stays_offline() {
        let mut peer = Peer::new("dnssd", "name._myapp._tcp.local.");
        peer.mark_offline();
        assert!(!peer.online);
    }
}
