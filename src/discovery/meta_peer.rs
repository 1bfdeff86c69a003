//! `MetaPeer`: a union across providers for one logical device, keyed by
//! `PeerID` (spec §3). Grounded in
//! `original_source/Networking/P2P/MetaPeer.hh`, whose `clockwise()` tie-break
//! is promoted from an internal helper into the documented best-peer policy.
use std::sync::RwLock;

use super::peer::{provisional_peer_id, Peer, PeerID};

/// Priority order for `best_peer()`'s tie-break: providers earlier in this
/// list win over later ones when more than one candidate is connectable
/// (spec §3: "tie-break by provider priority, e.g. DNS-SD over BT-LE").
pub const PROVIDER_PRIORITY: &[&str] = &["dnssd", "ble"];

/// Interprets two 128-bit values as positions on a clock face and asks
/// whether going clockwise from `a` to `b` is the shorter way around than
/// going from `b` to `a`. Used to break ties between equal-priority
/// candidates in a way that's fair and deterministic: any specific UUID is
/// preferred over exactly half of all other UUIDs (original_source's
/// rationale for not using plain `>` comparison, which would favor
/// low-numbered UUIDs).
pub fn clockwise(a: &PeerID, b: &PeerID) -> bool {
    let a = u128::from_be_bytes(a.0);
    let b = u128::from_be_bytes(b.0);
    let a_to_b = b.wrapping_sub(a);
    let b_to_a = a.wrapping_sub(b);
    a_to_b < b_to_a
}

/// A union of one or more same-device `Peer`s reported by different providers.
pub struct MetaPeer {
    pub id: PeerID,
    peers: RwLock<Vec<Peer>>,
}

impl MetaPeer {
    pub fn new(id: PeerID, first: Peer) -> Self {
        MetaPeer { id, peers: RwLock::new(vec![first]) }
    }

    pub fn count(&self) -> usize {
        self.peers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn add_peer(&self, peer: Peer) {
        self.peers.write().unwrap().push(peer);
    }

    /// Removes every underlying peer from this provider with this provider-local id.
    pub fn remove_peer(&self, provider: &str, id: &str) {
        self.peers.write().unwrap().retain(|p| !(p.provider == provider && p.id == id));
    }

    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().unwrap().clone()
    }

    /// The best peer to connect to: prefer connectable, then provider
    /// priority, then `clockwise` against this MetaPeer's own id as a stable
    /// deterministic tie-break.
    pub fn best_peer(&self) -> Option<Peer> {
        let peers = self.peers.read().unwrap();
        peers
            .iter()
            .filter(|p| p.online)
            .max_by(|x, y| self.compare_candidates(x, y))
            .cloned()
    }

    fn compare_candidates(&self, x: &Peer, y: &Peer) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        if x.connectable != y.connectable {
            return if x.connectable { Ordering::Greater } else { Ordering::Less };
        }
        let x_priority = provider_priority_rank(&x.provider);
        let y_priority = provider_priority_rank(&y.provider);
        if x_priority != y_priority {
            // Lower rank number = higher priority = "greater" for max_by.
            return y_priority.cmp(&x_priority);
        }
        // Equal provider priority: break the tie deterministically against this
        // MetaPeer's own id, the way `original_source` avoids always favoring
        // the low-numbered side of a pair (spec §10.5).
        let x_id = provisional_peer_id(&x.provider, &x.id);
        let y_id = provisional_peer_id(&y.provider, &y.id);
        if clockwise(&self.id, &x_id) && !clockwise(&self.id, &y_id) {
            Ordering::Greater
        } else if !clockwise(&self.id, &x_id) && clockwise(&self.id, &y_id) {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

fn provider_priority_rank(name: &str) -> usize {
    PROVIDER_PRIORITY.iter().position(|p| *p == name).unwrap_or(PROVIDER_PRIORITY.len())
}

#[cfg(test)]
mod test {
    use super::*;

    fn id(byte: u8) -> PeerID {
        let mut bytes = [0u8; 16];
        bytes[15] = byte;
        PeerID(bytes)
    }

    #[test]
    fn clockwise_prefers_the_shorter_arc() {
        assert!(clockwise(&id(0), &id(10)));
        assert!(!clockwise(&id(10), &id(0)));
    }

    #[test]
    fn prefers_connectable_peer_over_provider_priority() {
        let meta = MetaPeer::new(id(1), {
            let mut p = Peer::new("ble", "ble-1");
            p.connectable = false;
            p
        });
        let mut dnssd_peer = Peer::new("dnssd", "dnssd-1");
        dnssd_peer.connectable = true;
        meta.add_peer(dnssd_peer.clone());
        let best = meta.best_peer().unwrap();
        assert_eq!(best.provider, "dnssd");
    }

    #[test]
    fn ties_within_the_same_provider_are_broken_by_clockwise() {
        let meta_id = id(5);
        let mut a = Peer::new("dnssd", "a");
        a.connectable = true;
        let mut b = Peer::new("dnssd", "b");
        b.connectable = true;
        let meta = MetaPeer::new(meta_id, a.clone());
        meta.add_peer(b.clone());
        let best = meta.best_peer().unwrap();
        let a_id = provisional_peer_id("dnssd", "a");
        let b_id = provisional_peer_id("dnssd", "b");
        let a_wins = clockwise(&meta_id, &a_id) && !clockwise(&meta_id, &b_id);
        let expected = if a_wins { "a" } else { "b" };
        assert_eq!(best.id, expected);
    }

    #[test]
    fn ties_broken_by_provider_priority_when_both_connectable() {
        let mut ble_peer = Peer::new("ble", "ble-1");
        ble_peer.connectable = true;
        let meta = MetaPeer::new(id(1), ble_peer);
        let mut dnssd_peer = Peer::new("dnssd", "dnssd-1");
        dnssd_peer.connectable = true;
        meta.add_peer(dnssd_peer);
        let best = meta.best_peer().unwrap();
        assert_eq!(best.provider, "dnssd");
    }

    #[test]
    fn offline_peers_are_never_best() {
        let mut peer = Peer::new("dnssd", "dnssd-1");
        peer.online = false;
        let meta = MetaPeer::new(id(1), peer);
        assert!(meta.best_peer().is_none());
    }
}
