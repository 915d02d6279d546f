use crate::domain::models::PeerIdentity;
use std::collections::{BTreeMap, HashMap};

/// Metadata attached to a sighted peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveryInfo {
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Sighting {
    peer: PeerIdentity,
    info: DiscoveryInfo,
    sighted: u64,
}

/// Peer-to-peer candidates currently visible but not connected.
///
/// Never contains the counterpart of the active connected link; callers
/// promote through [`PeerSet::promote`].
#[derive(Debug, Default)]
pub struct PeerSet {
    entries: HashMap<PeerIdentity, Sighting>,
    sightings: u64,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the peer was not already present.
    pub fn insert(&mut self, peer: PeerIdentity, info: DiscoveryInfo) -> bool {
        if let Some(existing) = self.entries.get_mut(&peer) {
            existing.info = info;
            return false;
        }
        self.sightings += 1;
        self.entries.insert(
            peer.clone(),
            Sighting {
                peer,
                info,
                sighted: self.sightings,
            },
        );
        true
    }

    pub fn remove(&mut self, peer: &PeerIdentity) -> bool {
        self.entries.remove(peer).is_some()
    }

    /// Moves a candidate out of the set when it becomes the connected counterpart.
    pub fn promote(&mut self, peer: &PeerIdentity) -> Option<DiscoveryInfo> {
        self.entries.remove(peer).map(|s| s.info)
    }

    pub fn contains(&self, peer: &PeerIdentity) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn info(&self, peer: &PeerIdentity) -> Option<&DiscoveryInfo> {
        self.entries.get(peer).map(|s| &s.info)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Candidates in the order they were first sighted.
    pub fn peers(&self) -> Vec<PeerIdentity> {
        let mut ordered: Vec<&Sighting> = self.entries.values().collect();
        ordered.sort_by_key(|s| s.sighted);
        ordered.into_iter().map(|s| s.peer.clone()).collect()
    }
}
