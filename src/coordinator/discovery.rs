//! Discovery/Advertising Coordinator
//!
//! Keeps the [`PeerSet`] in step with continuous advertise + browse on the
//! shared service type, and decides incoming invitations.

use crate::domain::models::{LinkState, PeerIdentity};
use crate::domain::peers::{DiscoveryInfo, PeerSet};
use crate::infrastructure::transport::PeerTransport;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryFailure {
    Advertising(String),
    Browsing(String),
}

impl DiscoveryFailure {
    pub fn status_text(&self) -> &'static str {
        match self {
            DiscoveryFailure::Advertising(_) => "Failed to start advertising",
            DiscoveryFailure::Browsing(_) => "Failed to start browsing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationDecision {
    Accept,
    Reject,
}

/// First-connected-wins: accept unless the link is set up elsewhere or not at all.
pub fn decide_invitation(
    state: LinkState,
    counterpart: Option<&PeerIdentity>,
    from: &PeerIdentity,
) -> InvitationDecision {
    match state {
        LinkState::Idle => InvitationDecision::Reject,
        LinkState::Connecting | LinkState::Connected if counterpart != Some(from) => {
            InvitationDecision::Reject
        }
        _ => InvitationDecision::Accept,
    }
}

pub struct DiscoveryCoordinator {
    service_type: String,
    local: PeerIdentity,
    peers: PeerSet,
    advertising: bool,
    browsing: bool,
    failure: Option<DiscoveryFailure>,
}

impl DiscoveryCoordinator {
    pub fn new(service_type: impl Into<String>, local: PeerIdentity) -> Self {
        Self {
            service_type: service_type.into(),
            local,
            peers: PeerSet::new(),
            advertising: false,
            browsing: false,
            failure: None,
        }
    }

    pub fn local(&self) -> &PeerIdentity {
        &self.local
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerSet {
        &mut self.peers
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    pub fn is_browsing(&self) -> bool {
        self.browsing
    }

    pub fn failure(&self) -> Option<&DiscoveryFailure> {
        self.failure.as_ref()
    }

    /// Starts whatever is not already running.
    pub fn start(&mut self, transport: &mut dyn PeerTransport) {
        self.failure = None;
        if !self.advertising {
            info!("Advertising {} as {}", self.service_type, self.local);
            transport.start_advertising(&self.service_type);
            self.advertising = true;
        }
        if !self.browsing {
            info!("Browsing for {}", self.service_type);
            transport.start_browsing(&self.service_type);
            self.browsing = true;
        }
    }

    pub fn stop(&mut self, transport: &mut dyn PeerTransport) {
        if self.advertising {
            info!("Stopped advertising");
            transport.stop_advertising();
            self.advertising = false;
        }
        if self.browsing {
            info!("Stopped browsing");
            transport.stop_browsing();
            self.browsing = false;
        }
    }

    /// Returns true if the peer is a new candidate.
    pub fn on_peer_sighted(
        &mut self,
        peer: PeerIdentity,
        info: DiscoveryInfo,
        counterpart: Option<&PeerIdentity>,
    ) -> bool {
        if peer == self.local {
            return false;
        }
        if counterpart == Some(&peer) {
            debug!("Sighted current counterpart {}; not a candidate", peer);
            return false;
        }
        let added = self.peers.insert(peer.clone(), info);
        if added {
            info!("Found peer {}", peer);
        }
        added
    }

    pub fn on_peer_lost(&mut self, peer: &PeerIdentity) -> bool {
        let removed = self.peers.remove(peer);
        if removed {
            info!("Lost peer {}", peer);
        }
        removed
    }

    pub fn on_advertising_failed(&mut self, reason: String) {
        warn!("Advertising failed: {}", reason);
        self.advertising = false;
        self.failure = Some(DiscoveryFailure::Advertising(reason));
    }

    pub fn on_browsing_failed(&mut self, reason: String) {
        warn!("Browsing failed: {}", reason);
        self.browsing = false;
        self.failure = Some(DiscoveryFailure::Browsing(reason));
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.failure = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DisconnectReason;

    fn peer(id: u64) -> PeerIdentity {
        PeerIdentity::new(id, format!("peer-{}", id))
    }

    #[test]
    fn sightings_skip_self_and_counterpart() {
        let mut discovery = DiscoveryCoordinator::new("teleprompter", peer(1));
        assert!(!discovery.on_peer_sighted(peer(1), DiscoveryInfo::default(), None));
        assert!(!discovery.on_peer_sighted(peer(2), DiscoveryInfo::default(), Some(&peer(2))));
        assert!(discovery.on_peer_sighted(peer(3), DiscoveryInfo::default(), Some(&peer(2))));
        assert!(!discovery.on_peer_sighted(peer(3), DiscoveryInfo::default(), None));
        assert_eq!(discovery.peers().peers(), vec![peer(3)]);

        assert!(discovery.on_peer_lost(&peer(3)));
        assert!(!discovery.on_peer_lost(&peer(3)));
        assert!(discovery.peers().is_empty());
    }

    #[test]
    fn invitation_policy() {
        let (a, b) = (peer(1), peer(2));
        let cases = [
            (LinkState::Idle, None, InvitationDecision::Reject),
            (LinkState::Discovering, None, InvitationDecision::Accept),
            (
                LinkState::Disconnected(DisconnectReason::PeerLost),
                None,
                InvitationDecision::Accept,
            ),
            (LinkState::Connecting, Some(&a), InvitationDecision::Accept),
            (LinkState::Connecting, Some(&b), InvitationDecision::Reject),
            (LinkState::Connected, Some(&b), InvitationDecision::Reject),
        ];
        for (state, counterpart, expected) in cases {
            assert_eq!(decide_invitation(state, counterpart, &a), expected, "{}", state);
        }
    }

    #[test]
    fn failure_is_cleared_by_restart() {
        struct Silent;
        impl PeerTransport for Silent {
            fn is_supported(&self) -> bool {
                true
            }
            fn local_peer(&self) -> PeerIdentity {
                PeerIdentity::new(1, "me")
            }
            fn start_advertising(&mut self, _: &str) {}
            fn stop_advertising(&mut self) {}
            fn start_browsing(&mut self, _: &str) {}
            fn stop_browsing(&mut self) {}
            fn invite(
                &mut self,
                _: &PeerIdentity,
                _: std::time::Duration,
            ) -> Result<(), crate::domain::errors::TransportError> {
                Ok(())
            }
            fn respond_to_invitation(&mut self, _: &PeerIdentity, _: bool) {}
            fn send(
                &mut self,
                _: &PeerIdentity,
                _: Vec<u8>,
            ) -> Result<(), crate::domain::errors::TransportError> {
                Ok(())
            }
            fn disconnect(&mut self) {}
        }

        let mut transport = Silent;
        let mut discovery = DiscoveryCoordinator::new("teleprompter", peer(1));
        discovery.start(&mut transport);
        discovery.on_advertising_failed("no radio".to_string());
        assert!(!discovery.is_advertising());
        assert!(discovery.is_browsing());
        assert_eq!(
            discovery.failure().map(DiscoveryFailure::status_text),
            Some("Failed to start advertising")
        );

        discovery.start(&mut transport);
        assert!(discovery.is_advertising());
        assert_eq!(discovery.failure(), None);
    }
}
