//! Reachability & Reconnection Policy
//!
//! The paired transport does not push reachability changes reliably, so it is
//! sampled at a fixed interval and only flips observed at sample time are
//! reported. The peer-to-peer side follows network-path edges instead: a path
//! becoming available re-activates the link, nothing else retries it.

use crate::domain::models::PeerIdentity;
use crate::domain::peers::PeerSet;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathEdge {
    BecameAvailable,
    BecameUnavailable,
    Unchanged,
}

#[derive(Debug)]
pub struct LinkMonitor {
    poll_interval: Duration,
    paired_reachable: bool,
    path_available: Option<bool>,
}

impl LinkMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            paired_reachable: false,
            path_available: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Feeds one reachability sample; returns the new value if it flipped.
    pub fn observe_paired(&mut self, reachable: bool) -> Option<bool> {
        if reachable == self.paired_reachable {
            return None;
        }
        debug!(
            "Paired reachability flipped: {} -> {}",
            self.paired_reachable, reachable
        );
        self.paired_reachable = reachable;
        Some(reachable)
    }

    pub fn observe_path(&mut self, available: bool) -> PathEdge {
        if self.path_available == Some(available) {
            return PathEdge::Unchanged;
        }
        self.path_available = Some(available);
        info!(
            "Network path {}",
            if available { "available" } else { "unavailable" }
        );
        if available {
            PathEdge::BecameAvailable
        } else {
            PathEdge::BecameUnavailable
        }
    }

    pub fn path_available(&self) -> Option<bool> {
        self.path_available
    }

    /// Clears the PeerSet entry of a peer whose link just disconnected.
    pub fn on_disconnected(&self, peer: &PeerIdentity, peers: &mut PeerSet) -> bool {
        let removed = peers.remove(peer);
        if removed {
            debug!("Cleared candidate {} after disconnect", peer);
        }
        removed
    }

    /// Forget the paired baseline, e.g. after the link was recreated.
    pub fn reset_paired(&mut self) {
        self.paired_reachable = false;
    }
}
